//! Signed HTTP client shared by the source and destination gateways

use std::time::{Duration, SystemTime};

use aws_sigv4::http_request::{
	sign, SignableBody, SignableRequest, SigningParams, SigningSettings,
};
use hyper::client::HttpConnector;
use hyper::{Body, Method, Request, Response, StatusCode};
use hyper_rustls::HttpsConnector;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};

use ferry_util::error::{Error, Origin};

/// Characters percent-encoded in path segments; '/' is kept so that
/// object keys keep their natural shape
const PATH_ENCODE_SET: &AsciiSet = &CONTROLS
	.add(b' ')
	.add(b'%')
	.add(b'?')
	.add(b'#')
	.add(b'[')
	.add(b']')
	.add(b'\0');

/// Percent-encode one path or query component
pub fn encode_component(s: &str) -> String {
	utf8_percent_encode(s, PATH_ENCODE_SET).to_string()
}

/// Build a query string from optional parameters; returns "" when all
/// values are absent
pub fn query_string(params: &[(&str, Option<&str>)]) -> String {
	let mut query = String::new();
	for (name, value) in params {
		if let Some(value) = value {
			query.push(if query.is_empty() { '?' } else { '&' });
			query.push_str(name);
			if !value.is_empty() {
				query.push('=');
				query.push_str(&encode_component(value));
			}
		}
	}
	query
}

/// Credentials and signing region of a gateway endpoint
#[derive(Debug, Clone)]
pub struct GatewayCreds {
	pub region: String,
	pub access_key_id: String,
	pub secret_access_key: String,
}

/// Request body handed to the signed client
pub enum ClientBody {
	None,
	/// Buffered body, signed over its content
	Buf(Vec<u8>),
	/// Streaming body, signed as unsigned payload
	Stream(Body),
}

/// An HTTP client bound to one endpoint, signing every request
pub struct SignedClient {
	http: hyper::Client<HttpsConnector<HttpConnector>, Body>,
	endpoint: String,
	creds: GatewayCreds,
	origin: Origin,
	timeout: Duration,
}

impl SignedClient {
	pub fn new(endpoint: &str, creds: GatewayCreds, origin: Origin, timeout: Duration) -> Self {
		let connector = hyper_rustls::HttpsConnectorBuilder::new()
			.with_native_roots()
			.https_or_http()
			.enable_http1()
			.enable_http2()
			.build();
		Self {
			http: hyper::Client::builder().build(connector),
			endpoint: endpoint.trim_end_matches('/').to_string(),
			creds,
			origin,
			timeout,
		}
	}

	pub fn origin(&self) -> Origin {
		self.origin
	}

	/// Send a signed request. Connection-level failures and timeouts
	/// map to transient errors carrying this client's origin; HTTP
	/// status classification is left to the caller.
	pub async fn request(
		&self,
		method: Method,
		path_and_query: &str,
		headers: &[(&str, String)],
		body: ClientBody,
	) -> Result<Response<Body>, Error> {
		let uri = format!("{}{}", self.endpoint, path_and_query);
		let mut builder = Request::builder().method(method).uri(uri.as_str());
		for (name, value) in headers {
			builder = builder.header(*name, value.as_str());
		}
		let mut req = builder.body(Body::empty())?;

		let signing_settings = SigningSettings::default();
		let signing_params = SigningParams::builder()
			.access_key(&self.creds.access_key_id)
			.secret_key(&self.creds.secret_access_key)
			.region(&self.creds.region)
			.service_name("s3")
			.time(SystemTime::now())
			.settings(signing_settings)
			.build()
			.map_err(|e| Error::Message(format!("Could not build signing parameters: {}", e)))?;

		let signable_body = match &body {
			ClientBody::None => SignableBody::Bytes(b""),
			ClientBody::Buf(buf) => SignableBody::Bytes(&buf[..]),
			ClientBody::Stream(_) => SignableBody::UnsignedPayload,
		};
		let signable_request =
			SignableRequest::new(req.method(), req.uri(), req.headers(), signable_body);
		let (instructions, _signature) = sign(signable_request, &signing_params)
			.map_err(|e| Error::Message(format!("Could not sign request: {}", e)))?
			.into_parts();
		instructions.apply_to_request(&mut req);

		*req.body_mut() = match body {
			ClientBody::None => Body::empty(),
			ClientBody::Buf(buf) => Body::from(buf),
			ClientBody::Stream(stream) => stream,
		};

		let resp = tokio::time::timeout(self.timeout, self.http.request(req))
			.await
			.map_err(|_| Error::transient(self.origin, format!("request to {} timed out", uri)))?
			.map_err(|e| Error::transient(self.origin, e))?;
		Ok(resp)
	}
}

/// Classify a non-success status into the replication error taxonomy
pub fn classify_status(origin: Origin, status: StatusCode, describe: &str) -> Error {
	if status.is_server_error()
		|| status == StatusCode::TOO_MANY_REQUESTS
		|| status == StatusCode::REQUEST_TIMEOUT
	{
		Error::transient(origin, format!("HTTP {}: {}", status.as_u16(), describe))
	} else {
		let describe = format!("HTTP {}: {}", status.as_u16(), describe);
		match origin {
			Origin::Source => Error::PermanentSource(describe),
			Origin::Target => Error::PermanentTarget(describe),
		}
	}
}

/// Drain an error response and classify it.
/// Error bodies are JSON `{code, message}` when the peer produced
/// them; anything else is carried as an opaque excerpt.
pub async fn error_from_response(origin: Origin, resp: Response<Body>) -> Error {
	let status = resp.status();
	let body = hyper::body::to_bytes(resp.into_body())
		.await
		.unwrap_or_default();
	let describe = match serde_json::from_slice::<serde_json::Value>(&body) {
		Ok(v) => {
			let code = v.get("code").and_then(|c| c.as_str()).unwrap_or("");
			let message = v.get("message").and_then(|m| m.as_str()).unwrap_or("");
			format!("{} {}", code, message).trim().to_string()
		}
		Err(_) => String::from_utf8_lossy(&body[..body.len().min(256)]).into_owned(),
	};
	classify_status(origin, status, &describe)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_query_string() {
		assert_eq!(query_string(&[("versionId", None)]), "");
		assert_eq!(
			query_string(&[("uploads", Some("")), ("versionId", Some("v 1"))]),
			"?uploads&versionId=v%201"
		);
	}

	#[test]
	fn test_classify_status() {
		let e = classify_status(Origin::Target, StatusCode::SERVICE_UNAVAILABLE, "slow down");
		assert!(e.retryable());
		assert_eq!(e.origin(), Some(Origin::Target));

		let e = classify_status(Origin::Target, StatusCode::BAD_REQUEST, "no");
		assert!(matches!(e, Error::PermanentTarget(_)));

		let e = classify_status(Origin::Source, StatusCode::FORBIDDEN, "AccessDenied");
		assert!(matches!(e, Error::PermanentSource(_)));

		let e = classify_status(Origin::Source, StatusCode::TOO_MANY_REQUESTS, "throttled");
		assert!(e.retryable());
	}

	#[test]
	fn test_encode_component_keeps_slashes() {
		assert_eq!(encode_component("a/b c"), "a/b%20c");
	}
}
