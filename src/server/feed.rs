use std::io;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesText, Event};

use super::router::AppState;
use crate::store::ProjectWithUser;
use crate::types::{Pager, ProjectOrder};

/// Atom discovery feed of the most recent projects across all users.
pub async fn rss_created(State(state): State<Arc<AppState>>) -> Response {
    render_feed(&state, ProjectOrder::CreatedAt)
}

pub async fn rss_updated(State(state): State<Arc<AppState>>) -> Response {
    render_feed(&state, ProjectOrder::UpdatedAt)
}

fn render_feed(state: &AppState, by: ProjectOrder) -> Response {
    let page = match state
        .store
        .find_all_projects(&Pager { num: 100, page: 0 }, by)
    {
        Ok(page) => page,
        Err(e) => {
            tracing::error!(err = %e, "could not find projects for feed");
            return (StatusCode::INTERNAL_SERVER_ERROR, "could not generate feed")
                .into_response();
        }
    };

    match write_atom(state, by, &page.data) {
        Ok(xml) => ([(header::CONTENT_TYPE, "application/atom+xml")], xml).into_response(),
        Err(e) => {
            tracing::error!(err = %e, "could not serialize feed");
            (StatusCode::INTERNAL_SERVER_ERROR, "could not generate feed").into_response()
        }
    }
}

fn write_atom(
    state: &AppState,
    by: ProjectOrder,
    projects: &[ProjectWithUser],
) -> io::Result<String> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    let cfg = state.cfg.clone();

    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;

    writer
        .create_element("feed")
        .with_attribute(("xmlns", "http://www.w3.org/2005/Atom"))
        .write_inner_content(|feed| {
            text_element(
                feed,
                "title",
                &format!("{} discovery feed {}", cfg.domain, by.column()),
            )?;
            text_element(feed, "id", &format!("{}://{}/", cfg.protocol, cfg.domain))?;
            text_element(feed, "updated", &Utc::now().to_rfc3339())?;
            feed.create_element("link")
                .with_attribute(("href", "/"))
                .write_empty()?;

            for entry in projects {
                let project = &entry.project;
                let url = cfg
                    .asset_url(&entry.username, &project.name, "")
                    .trim_end_matches('/')
                    .to_string();
                let mut title = format!("{}-{}", entry.username, project.name);
                let mut id = url.clone();
                if by == ProjectOrder::UpdatedAt {
                    let uat = project.updated_at.timestamp();
                    id = format!("{url}:{uat}");
                    title = format!("{title} - {uat}");
                }

                feed.create_element("entry").write_inner_content(|e| {
                    text_element(e, "id", &id)?;
                    text_element(e, "title", &title)?;
                    e.create_element("link")
                        .with_attribute(("href", url.as_str()))
                        .write_empty()?;
                    text_element(e, "updated", &project.updated_at.to_rfc3339())?;
                    e.create_element("author")
                        .write_inner_content(|a| text_element(a, "name", &entry.username))?;
                    text_element(e, "content", &url)?;
                    Ok(())
                })?;
            }
            Ok(())
        })?;

    Ok(String::from_utf8_lossy(&writer.into_inner()).into_owned())
}

fn text_element(writer: &mut Writer<Vec<u8>>, name: &str, text: &str) -> io::Result<()> {
    writer
        .create_element(name)
        .write_text_content(BytesText::new(text))?;
    Ok(())
}
