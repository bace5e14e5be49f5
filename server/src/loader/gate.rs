//! Delivery gate: the ordered validation pipeline behind every ephemeral
//! route.
//!
//! Stages run strictly in [`GateStage`] order. The first failing stage ends
//! the request with its [`Rejection`]; nothing is retried and nothing is
//! consumed. Only after every check has passed and the envelope is built is a
//! single-use route deleted, and that delete is atomic: when two requests race
//! on the same route, exactly one gets the payload and the other gets 404.

use axum::http::StatusCode;
use chrono::{DateTime, Utc};

use crate::db::models::RouteKind;
use crate::keys::validate::{validate_key, KeyError};
use crate::loader::envelope::PayloadWrapper;
use crate::loader::environment::EnvironmentProbe;
use crate::loader::usage::log_usage;
use crate::store::{Store, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateStage {
    RouteLookup,
    EnvironmentCheck,
    BanCheck,
    ExpiryCheck,
    TokenCheck,
    KeyPresenceCheck,
    KeyValidityCheck,
    KeyExpiryCheck,
    KillSwitchCheck,
    PayloadFetch,
    Respond,
}

#[derive(Debug, thiserror::Error)]
pub enum Rejection {
    #[error("404 Not Found")]
    RouteNotFound,
    #[error("Suspicious environment. Aborting route usage.")]
    SuspiciousEnvironment,
    #[error("You are banned from using this service.")]
    Banned,
    #[error("Ephemeral route expired")]
    RouteExpired,
    #[error("Invalid token")]
    InvalidToken,
    #[error("Missing key param")]
    MissingKey,
    #[error("Invalid key")]
    InvalidKey,
    #[error("Key expired")]
    KeyExpired,
    #[error("Kill Switch active. Scripts disabled.")]
    KillSwitchActive,
    #[error("No program stored for {} delivery", .0.as_str())]
    NoProgram(RouteKind),
    /// Lost the consumption race to a concurrent request.
    #[error("404 Not Found")]
    RouteConsumed,
    #[error("Internal error")]
    Store {
        stage: GateStage,
        #[source]
        source: StoreError,
    },
}

impl Rejection {
    pub fn status(&self) -> StatusCode {
        match self {
            Rejection::RouteNotFound | Rejection::RouteConsumed => StatusCode::NOT_FOUND,
            Rejection::MissingKey => StatusCode::BAD_REQUEST,
            Rejection::NoProgram(_) | Rejection::Store { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            _ => StatusCode::FORBIDDEN,
        }
    }

    /// Whether the attempt is logged as suspicious. Lookup misses and the
    /// operator-driven kill switch are not.
    pub fn is_suspicious(&self) -> bool {
        !matches!(
            self,
            Rejection::RouteNotFound | Rejection::KillSwitchActive | Rejection::Store { .. }
        )
    }

    pub fn stage(&self) -> GateStage {
        match self {
            Rejection::RouteNotFound => GateStage::RouteLookup,
            Rejection::SuspiciousEnvironment => GateStage::EnvironmentCheck,
            Rejection::Banned => GateStage::BanCheck,
            Rejection::RouteExpired => GateStage::ExpiryCheck,
            Rejection::InvalidToken => GateStage::TokenCheck,
            Rejection::MissingKey => GateStage::KeyPresenceCheck,
            Rejection::InvalidKey => GateStage::KeyValidityCheck,
            Rejection::KeyExpired => GateStage::KeyExpiryCheck,
            Rejection::KillSwitchActive => GateStage::KillSwitchCheck,
            Rejection::NoProgram(_) => GateStage::PayloadFetch,
            Rejection::RouteConsumed => GateStage::Respond,
            Rejection::Store { stage, .. } => *stage,
        }
    }
}

impl From<Rejection> for (StatusCode, String) {
    fn from(r: Rejection) -> Self {
        (r.status(), r.to_string())
    }
}

fn at(stage: GateStage) -> impl FnOnce(StoreError) -> Rejection {
    move |source| Rejection::Store { stage, source }
}

/// One inbound call to a delivery route.
#[derive(Debug, Clone)]
pub struct DeliveryRequest {
    pub kind: RouteKind,
    pub route_name: String,
    pub client_ip: String,
    pub key: Option<String>,
    pub hwid: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug)]
pub struct Delivery {
    /// Wrapped payload, served as plain text.
    pub body: String,
    /// True when this call deleted a single-use route.
    pub consumed: bool,
}

pub struct DeliveryGate<'a> {
    store: &'a dyn Store,
    probe: &'a dyn EnvironmentProbe,
    wrapper: &'a dyn PayloadWrapper,
}

impl<'a> DeliveryGate<'a> {
    pub fn new(
        store: &'a dyn Store,
        probe: &'a dyn EnvironmentProbe,
        wrapper: &'a dyn PayloadWrapper,
    ) -> Self {
        Self {
            store,
            probe,
            wrapper,
        }
    }

    /// Run the pipeline for `req` as of `now` and log the outcome.
    pub fn deliver(&self, req: &DeliveryRequest, now: DateTime<Utc>) -> Result<Delivery, Rejection> {
        let result = self.evaluate(req, now);
        match &result {
            Ok(_) => log_usage(req.kind, &req.route_name, &req.client_ip, false),
            Err(Rejection::Store { stage, source }) => {
                tracing::error!(
                    route = %req.route_name,
                    stage = ?stage,
                    "Delivery store failure: {}",
                    source
                );
            }
            Err(rejection) if rejection.is_suspicious() => {
                log_usage(req.kind, &req.route_name, &req.client_ip, true)
            }
            Err(rejection) => {
                tracing::debug!(
                    route = %req.route_name,
                    stage = ?rejection.stage(),
                    "Delivery rejected: {}",
                    rejection
                );
            }
        }
        result
    }

    fn evaluate(&self, req: &DeliveryRequest, now: DateTime<Utc>) -> Result<Delivery, Rejection> {
        let route = self
            .store
            .find_route(req.kind, &req.route_name)
            .map_err(at(GateStage::RouteLookup))?
            .ok_or(Rejection::RouteNotFound)?;

        if self.probe.is_suspicious() {
            return Err(Rejection::SuspiciousEnvironment);
        }

        if self
            .store
            .find_blocked(&req.client_ip)
            .map_err(at(GateStage::BanCheck))?
            .is_some()
        {
            return Err(Rejection::Banned);
        }

        if route.is_expired(now) {
            return Err(Rejection::RouteExpired);
        }

        if req.token.as_deref().unwrap_or("") != route.token {
            return Err(Rejection::InvalidToken);
        }

        let key_value = req
            .key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or(Rejection::MissingKey)?;

        let key = validate_key(self.store, key_value, now).map_err(|e| match e {
            KeyError::NotFound => Rejection::InvalidKey,
            KeyError::Expired => Rejection::KeyExpired,
            KeyError::Store(source) => at(GateStage::KeyValidityCheck)(source),
        })?;

        // Bound hardware ids are recorded but not enforced.
        if let (Some(bound), Some(given)) = (key.hwid.as_deref(), req.hwid.as_deref()) {
            if bound != given {
                tracing::debug!(route = %req.route_name, "HWID differs from key binding");
            }
        }

        if self
            .store
            .kill_switch()
            .map_err(at(GateStage::KillSwitchCheck))?
        {
            return Err(Rejection::KillSwitchActive);
        }

        let payload = match req.kind {
            RouteKind::Script => self.store.script().map(|s| s.map(|s| s.code)),
            RouteKind::Vm => self.store.program().map(|p| p.map(|p| p.bytecode)),
        }
        .map_err(at(GateStage::PayloadFetch))?
        .ok_or(Rejection::NoProgram(req.kind))?;

        let body = self.wrapper.wrap(&payload, req.kind);

        let consumed = route.single_use
            && self
                .store
                .consume_route(req.kind, &req.route_name)
                .map_err(at(GateStage::Respond))?;
        if route.single_use && !consumed {
            return Err(Rejection::RouteConsumed);
        }

        Ok(Delivery { body, consumed })
    }
}
