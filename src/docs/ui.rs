use axum::{
    extract::State,
    http::header::CONTENT_TYPE,
    response::{Html, IntoResponse, Redirect},
    routing::get,
    Json, Router,
};
use std::sync::Arc;

use crate::docs::ApiDocumentation;

pub const DOCUMENT_PATH: &str = "/swagger/v1/swagger.json";
pub const UI_PATH: &str = "/swagger/index.html";
pub const REDIRECT_PATH: &str = "/swagger/oauth2-redirect.html";

/// Documentation routes; mounted only outside production
pub fn router<S>(docs: Arc<ApiDocumentation>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new()
        .route(DOCUMENT_PATH, get(openapi_document))
        .route("/swagger", get(redirect_to_ui))
        .route("/swagger/", get(redirect_to_ui))
        .route(UI_PATH, get(swagger_ui))
        .route(REDIRECT_PATH, get(oauth2_redirect))
        .with_state(docs)
}

async fn openapi_document(State(docs): State<Arc<ApiDocumentation>>) -> impl IntoResponse {
    Json(docs.document().clone())
}

async fn redirect_to_ui() -> Redirect {
    Redirect::permanent(UI_PATH)
}

async fn swagger_ui(State(docs): State<Arc<ApiDocumentation>>) -> Html<String> {
    Html(docs.ui_html().to_string())
}

async fn oauth2_redirect() -> impl IntoResponse {
    ([(CONTENT_TYPE, "text/html; charset=utf-8")], OAUTH2_REDIRECT_HTML)
}

/// Render the Swagger UI page with the OAuth client pre-filled.
///
/// A directory `domain` is forwarded to the authorize request as `domain_hint`.
pub fn render_ui(title: &str, client_id: &str, domain: Option<&str>, scopes: &[String]) -> String {
    let query_params = match domain {
        Some(domain) => serde_json::json!({ "domain_hint": domain }),
        None => serde_json::json!({}),
    };

    format!(
        r##"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="utf-8">
    <title>{title}</title>
    <link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css">
</head>
<body>
    <div id="swagger-ui"></div>
    <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js" crossorigin></script>
    <script>
        window.onload = function () {{
            const ui = SwaggerUIBundle({{
                url: "{document}",
                dom_id: "#swagger-ui",
                oauth2RedirectUrl: window.location.origin + "{redirect}",
            }});
            ui.initOAuth({{
                clientId: {client_id},
                scopes: {scopes},
                additionalQueryStringParams: {query_params},
            }});
        }};
    </script>
</body>
</html>
"##,
        title = escape_html(title),
        document = DOCUMENT_PATH,
        redirect = REDIRECT_PATH,
        client_id = js_literal(&client_id),
        scopes = js_literal(&scopes),
        query_params = js_literal(&query_params),
    )
}

/// JSON literal safe to embed inside a `<script>` element
fn js_literal<T: serde::Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string(value)
        .unwrap_or_else(|_| "null".to_string())
        .replace('<', "\\u003c")
        .replace('>', "\\u003e")
        .replace('&', "\\u0026")
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Receives the implicit-flow response and hands the token back to the UI window
const OAUTH2_REDIRECT_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="utf-8"><title>OAuth2 Redirect</title></head>
<body>
<script>
'use strict';
(function () {
    var oauth2 = window.opener && window.opener.swaggerUIRedirectOauth2;
    if (!oauth2) {
        document.body.textContent = "No authorization request in progress.";
        return;
    }

    var raw = window.location.hash.substring(1) || window.location.search.substring(1);
    var params = {};
    raw.split("&").forEach(function (pair) {
        if (!pair) { return; }
        var i = pair.indexOf("=");
        var key = decodeURIComponent(i < 0 ? pair : pair.slice(0, i));
        params[key] = i < 0 ? "" : decodeURIComponent(pair.slice(i + 1).replace(/\+/g, " "));
    });

    if (params.error) {
        oauth2.errCb({
            authId: oauth2.auth.name,
            source: "auth",
            level: "error",
            message: params.error_description || params.error
        });
    } else if (params.access_token) {
        oauth2.callback({
            auth: oauth2.auth,
            token: params,
            isValid: params.state === oauth2.state,
            redirectUrl: oauth2.redirectUrl
        });
    } else {
        oauth2.errCb({
            authId: oauth2.auth.name,
            source: "auth",
            level: "warning",
            message: "Authorization response did not contain an access token"
        });
    }
    window.close();
})();
</script>
</body>
</html>
"#;
