use std::{fmt::Display, sync::Arc};

use axum::{
    body::Bytes,
    extract::{FromRef, FromRequest, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use hmac::{Hmac, Mac};
use pr_ci_core::{
    config::Config,
    events::{ChangeNotification, SnsEnvelope},
};
use sha2::Sha256;

/// Verify and decode an SNS-delivered change notification.
#[derive(Clone)]
#[must_use]
pub struct SnsNotification {
    pub notification: ChangeNotification,
}

impl<S> FromRequest<S> for SnsNotification
where
    Arc<Config>: FromRef<S>,
    S: Send + Sync + Clone,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        fn err(m: impl Display) -> Response {
            tracing::error!("{m}");
            (StatusCode::BAD_REQUEST, m.to_string()).into_response()
        }
        let config = <Arc<Config>>::from_ref(state);
        let body = if let Some(secret) = &config.server.webhook_secret {
            let signature_sha256 = req
                .headers()
                .get("X-Signature-256")
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| err("X-Signature-256 header missing"))?
                .strip_prefix("sha256=")
                .ok_or_else(|| err("X-Signature-256 sha256= prefix missing"))?;
            let signature =
                hex::decode(signature_sha256).map_err(|_| err("X-Signature-256 malformed"))?;
            let body =
                Bytes::from_request(req, state).await.map_err(|_| err("error reading body"))?;
            let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
                .expect("HMAC can take key of any size");
            mac.update(&body);
            if mac.verify_slice(&signature).is_err() {
                return Err(err("signature mismatch"));
            }
            body
        } else {
            Bytes::from_request(req, state).await.map_err(|_| err("error reading body"))?
        };
        let envelope: SnsEnvelope =
            serde_json::from_slice(&body).map_err(|_| err("error parsing envelope"))?;
        let notification = ChangeNotification::from_envelope(&envelope)
            .map_err(|e| err(format!("invalid notification: {e:#}")))?;
        Ok(SnsNotification { notification })
    }
}
