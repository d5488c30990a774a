use std::collections::BTreeMap;

use axum::{http::StatusCode, routing::get, routing::MethodRouter, Router};

pub const HEALTH_PATH: &str = "/health";

/// Route table handed to [`new_server`](crate::new_server): path to handler.
#[derive(Default)]
pub struct Routes {
    routes: BTreeMap<String, MethodRouter>,
}

impl Routes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` at `path`, replacing an earlier registration of the same path.
    pub fn route(mut self, path: impl Into<String>, handler: MethodRouter) -> Self {
        self.routes.insert(path.into(), handler);
        self
    }

    pub fn contains(&self, path: &str) -> bool {
        self.routes.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Builds the main router, adding `GET /health` unless the caller registered it.
pub fn create_router(routes: Routes) -> Router {
    let has_health = routes.contains(HEALTH_PATH);
    let router = routes
        .routes
        .into_iter()
        .fold(Router::new(), |router, (path, handler)| {
            router.route(&path, handler)
        });

    if has_health {
        router
    } else {
        router.route(HEALTH_PATH, get(health))
    }
}

async fn health() -> String {
    format!("Status: {}", StatusCode::OK.as_u16())
}
