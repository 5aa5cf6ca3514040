// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Request pipeline for authenticated routes: authenticate, rate-limit API
//! keys, then replay-or-continue on the idempotency token.

use super::AppState;
use super::error::AppError;
use crate::LedgerError;
use crate::credential::Credential;
use crate::idempotency::{IdempotencyDecision, IdempotencyRecord};
use axum::{
    body::{self, Body},
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use tracing::{debug, error, warn};

pub const API_KEY_HEADER: &str = "x-api-key";
pub const IDEMPOTENCY_HEADER: &str = "x-idempotency-key";

/// Largest response body the idempotency layer will buffer.
const MAX_CACHED_BODY: usize = 1024 * 1024;

pub async fn authenticate(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let credential = resolve_credential(&state, request.headers()).inspect_err(|_| {
        debug!(path = %request.uri().path(), "rejected unauthenticated request");
    })?;
    request.extensions_mut().insert(credential);
    Ok(next.run(request).await)
}

fn resolve_credential(state: &AppState, headers: &HeaderMap) -> Result<Credential, LedgerError> {
    if let Some(token) = extract_bearer(headers) {
        return state.credentials.resolve_bearer(token);
    }
    let secret = headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or(LedgerError::Unauthorized)?;
    state.credentials.resolve_api_key(secret, Utc::now())
}

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    let token = headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")?
        .trim();
    (!token.is_empty()).then_some(token)
}

/// Counts requests per API key. Session tokens are not limited.
pub async fn rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if let Some(key_id) = request
        .extensions()
        .get::<Credential>()
        .and_then(Credential::key_id)
    {
        state.rate_guard.check(key_id.as_str())?;
    }
    Ok(next.run(request).await)
}

/// Replays stored responses for repeated `X-Idempotency-Key` tokens on
/// mutating requests and stores fresh 2xx responses.
pub async fn idempotency(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if request.method() != Method::POST {
        return Ok(next.run(request).await);
    }
    let caller = request
        .extensions()
        .get::<Credential>()
        .map(|credential| credential.user_id().clone())
        .ok_or(LedgerError::Unauthorized)?;
    let token = request
        .headers()
        .get(IDEMPOTENCY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);
    let path = request.uri().path().to_owned();

    let decision = state
        .idempotency
        .before(&caller, &path, token.as_deref(), Utc::now())?;
    let fingerprint = match decision {
        IdempotencyDecision::Replay(record) => return Ok(replay(record)),
        IdempotencyDecision::Continue(None) => return Ok(next.run(request).await),
        IdempotencyDecision::Continue(Some(fingerprint)) => fingerprint,
    };

    let response = next.run(request).await;
    if !response.status().is_success() {
        return Ok(response);
    }

    let (parts, body) = response.into_parts();
    let bytes = match body::to_bytes(body, MAX_CACHED_BODY).await {
        Ok(bytes) => bytes,
        Err(err) => {
            error!(path = %path, error = %err, "failed to buffer response for idempotency");
            return Ok(StatusCode::INTERNAL_SERVER_ERROR.into_response());
        }
    };
    let content_type = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);

    // The operation already happened; a failed store only loses replay.
    if let Err(err) = state.idempotency.after(
        fingerprint,
        parts.status.as_u16(),
        content_type,
        bytes.to_vec(),
        Utc::now(),
    ) {
        warn!(path = %path, error = %err, "failed to store idempotent response");
    }
    Ok(Response::from_parts(parts, Body::from(bytes)))
}

fn replay(record: IdempotencyRecord) -> Response {
    let status = StatusCode::from_u16(record.status).unwrap_or(StatusCode::OK);
    let mut response = Response::new(Body::from(record.body));
    *response.status_mut() = status;
    if let Some(content_type) = record
        .content_type
        .and_then(|value| HeaderValue::from_str(&value).ok())
    {
        response.headers_mut().insert(header::CONTENT_TYPE, content_type);
    }
    response
}
