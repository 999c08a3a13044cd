//! Custom middlewares

use axum::{
	body::Body,
	http::{HeaderValue, Request},
	middleware::Next,
	response::Response,
};

/// Request id attached to extensions and echoed in the response headers.
#[derive(Clone, Debug)]
pub struct RequestId(pub Box<str>);

pub async fn request_id_middleware(mut req: Request<Body>, next: Next) -> Response {
	let id = uuid::Uuid::new_v4().to_string();
	req.extensions_mut().insert(RequestId(id.clone().into()));

	let mut res = next.run(req).await;
	if let Ok(value) = HeaderValue::from_str(&id) {
		res.headers_mut().insert("x-request-id", value);
	}
	res
}

// vim: ts=4
