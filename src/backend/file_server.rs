//! `file_server <root>`: static files, with an optional `browse` child that
//! turns on directory listings.

use std::fmt::Write as _;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::{CONTENT_TYPE, LOCATION};
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use html_escape::{encode_double_quoted_attribute, encode_text};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use tower::ServiceExt;
use tower_http::services::ServeDir;

use crate::config::schema::{Directive, DirectiveError};
use crate::routing::router::not_found;

/// Characters escaped in listing hrefs.
const HREF: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?');

#[derive(Clone)]
struct FileServer {
    root: Arc<PathBuf>,
    files: ServeDir,
    browse: bool,
}

pub fn build(directive: &Directive) -> Result<Router, DirectiveError> {
    let [root] = directive.expect_params::<1>()?;
    if let Some(child) = directive.children.iter().find(|c| c.name != "browse") {
        return Err(directive.invalid(format!("unknown child directive {:?}", child.name)));
    }

    let state = FileServer {
        root: Arc::new(PathBuf::from(root)),
        files: ServeDir::new(root),
        browse: directive.child("browse").is_some(),
    };
    Ok(Router::new().fallback(serve).with_state(state))
}

async fn serve(State(fs): State<FileServer>, req: Request) -> Response {
    let Some(relative) = relative_path(req.uri().path()) else {
        return not_found();
    };
    let full = fs.root.join(&relative);

    let is_dir = tokio::fs::metadata(&full)
        .await
        .map(|meta| meta.is_dir())
        .unwrap_or(false);
    if is_dir {
        if !req.uri().path().ends_with('/') {
            return redirect_to_dir(req.uri());
        }
        let has_index = tokio::fs::try_exists(full.join("index.html"))
            .await
            .unwrap_or(false);
        if !has_index {
            if !fs.browse {
                return not_found();
            }
            return match render_listing(&full).await {
                Ok(html) => ([(CONTENT_TYPE, "text/html; charset=utf-8")], html).into_response(),
                Err(e) => {
                    tracing::warn!(path = %full.display(), error = %e, "Failed to list directory");
                    (StatusCode::INTERNAL_SERVER_ERROR, "Error reading directory\n")
                        .into_response()
                }
            };
        }
    }

    match fs.files.oneshot(req).await {
        Ok(res) => res.map(Body::new),
        Err(never) => match never {},
    }
}

/// Decoded request path relative to the root. `None` for paths that try
/// to climb out of it.
fn relative_path(path: &str) -> Option<PathBuf> {
    let decoded = percent_decode_str(path).decode_utf8().ok()?;
    let mut relative = PathBuf::new();
    for component in Path::new(decoded.trim_start_matches('/')).components() {
        match component {
            Component::Normal(segment) => relative.push(segment),
            Component::CurDir | Component::RootDir => {}
            Component::ParentDir | Component::Prefix(_) => return None,
        }
    }
    Some(relative)
}

/// Relative redirect so the location stays correct under a stripped prefix.
fn redirect_to_dir(uri: &Uri) -> Response {
    let last = uri.path().rsplit('/').next().unwrap_or_default();
    let location = match uri.query() {
        Some(query) => format!("{last}/?{query}"),
        None => format!("{last}/"),
    };
    (StatusCode::MOVED_PERMANENTLY, [(LOCATION, location)]).into_response()
}

async fn render_listing(dir: &Path) -> std::io::Result<String> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let mut name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type().await?.is_dir() {
            name.push('/');
        }
        names.push(name);
    }
    names.sort();

    let mut body = String::from("<!doctype html>\n<meta name=\"viewport\" content=\"width=device-width\">\n<pre>\n");
    for name in names {
        let href = utf8_percent_encode(&name, HREF).to_string();
        let _ = writeln!(
            body,
            "<a href=\"{}\">{}</a>",
            encode_double_quoted_attribute(&href),
            encode_text(&name)
        );
    }
    body.push_str("</pre>\n");
    Ok(body)
}
