//! Page shells
//!
//! Each page is a bare HTML document naming the section; the route guard has
//! already decided whether the caller may see it.

use axum::{
    http::Uri,
    response::{Html, IntoResponse, Redirect, Response},
};
use tracing::debug;

use crate::middleware_hooks::CurrentUser;

/// Pages served by [`section`], in addition to `/dashboard`.
pub const PAGE_PATHS: &[&str] = &[
    "/",
    "/login",
    "/public/feedback",
    "/dashboard/trainee",
    "/dashboard/employer",
    "/dashboard/mentor",
    "/dashboard/admin",
    "/admin",
    "/admin/announcements",
    "/announcements",
    "/progress",
    "/quests",
    "/badges",
    "/schedule",
    "/messages",
    "/uploads",
    "/help",
];

fn title_for(path: &str) -> String {
    match path {
        "/" => "Portal".to_string(),
        "/login" => "Sign in".to_string(),
        "/public/feedback" => "Customer feedback".to_string(),
        other => other
            .trim_start_matches('/')
            .split('/')
            .map(|segment| {
                let mut chars = segment.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" / "),
    }
}

/// Render the shell for whatever path was hit.
pub async fn section(uri: Uri) -> Html<String> {
    let path = uri.path();
    debug!("Rendering page {}", path);
    let title = title_for(path);
    Html(format!(
        "<!doctype html>\n<html lang=\"en\">\n<head><meta charset=\"utf-8\"><title>{title}</title></head>\n<body><main data-path=\"{path}\"><h1>{title}</h1></main></body>\n</html>\n"
    ))
}

/// `/dashboard` sends each caller to the dashboard for their role.
pub async fn dashboard(CurrentUser(identity): CurrentUser) -> Response {
    Redirect::temporary(identity.role.dashboard_route()).into_response()
}
