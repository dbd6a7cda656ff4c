//! The listing page: an upload form plus the bucket's current keys.
//!
//! Keys come from a live bucket listing, not from the metadata table.

use crate::state::AppState;
use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use tracing::error;

/// `GET /`
pub async fn index(State(state): State<AppState>) -> Response {
    match state.uploads.objects().list_objects().await {
        Ok(objects) => {
            let keys: Vec<String> = objects.into_iter().map(|o| o.key).collect();
            Html(render_index(&keys)).into_response()
        }
        Err(err) => {
            error!("Error fetching file list: {}", err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "An error occurred while fetching the file list.",
            )
                .into_response()
        }
    }
}

pub fn render_index(keys: &[String]) -> String {
    let files = if keys.is_empty() {
        "<p>No files uploaded yet.</p>".to_string()
    } else {
        keys.iter()
            .map(|key| format!("<p>{}</p>", html_escape(key)))
            .collect::<String>()
    };

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="UTF-8">
  <meta name="viewport" content="width=device-width, initial-scale=1.0">
  <title>File Upload</title>
  <style>
    body {{ font-family: Arial, sans-serif; margin: 0; display: flex; justify-content: center; align-items: center; min-height: 100vh; background-color: #f8f9fa; }}
    .container {{ text-align: center; background: white; padding: 40px 60px; border-radius: 10px; box-shadow: 0 6px 15px rgba(0, 0, 0, 0.1); width: 80%; max-width: 600px; }}
    h2 {{ font-size: 28px; color: #333; margin-bottom: 30px; }}
    label {{ background-color: #007bff; color: white; padding: 12px 24px; border-radius: 5px; cursor: pointer; display: inline-block; margin-bottom: 20px; }}
    input[type="file"] {{ display: none; }}
    #file-chosen {{ display: block; margin-top: 10px; font-size: 14px; color: #555; }}
    input[type="submit"] {{ padding: 12px 24px; background-color: #28a745; color: white; border: none; border-radius: 5px; cursor: pointer; font-size: 16px; margin-top: 20px; }}
    input[type="submit"]:hover {{ background-color: #218838; }}
    .file-list {{ margin-top: 30px; text-align: left; }}
    .file-list h3 {{ margin-bottom: 10px; color: #333; }}
    .file-list p {{ color: #666; }}
  </style>
</head>
<body>
  <div class="container">
    <h2>Upload a File</h2>
    <form action="/api/upload" enctype="multipart/form-data" method="post">
      <div>
        <label for="file">Choose a File:</label>
        <input type="file" id="file" name="file" multiple="multiple" />
        <span id="file-chosen">No file chosen</span>
      </div>
      <input type="submit" value="Upload">
    </form>
    <div class="file-list">
      <h3>Files List</h3>
      {files}
    </div>
  </div>
  <script>
    const fileInput = document.getElementById('file');
    const fileChosen = document.getElementById('file-chosen');
    fileInput.addEventListener('change', () => {{
      const names = Array.from(fileInput.files).map(file => file.name).join(', ');
      fileChosen.textContent = names || "No file chosen";
    }});
  </script>
</body>
</html>
"#
    )
}

fn html_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
