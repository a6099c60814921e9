//! Typed OAuth redirect results.
//!
//! A provider redirect lands with either an authorization code in the query
//! string or tokens in the URL fragment. [`RedirectResult`] captures which,
//! and [`plan_redirect`] decides what the token store should do with it
//! without touching the network.

use serde::{Deserialize, Serialize};

use crate::Provider;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RedirectPayload {
    AuthorizationCode {
        code: String,
        state: Option<String>,
    },
    Fragment {
        provider_token: String,
        provider_refresh_token: Option<String>,
    },
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectResult {
    /// Provider named by the redirect itself, when it names one.
    pub provider: Option<Provider>,
    pub payload: RedirectPayload,
    /// `error` parameter set by the provider on a refused consent.
    pub error: Option<String>,
}

fn parse_pairs(raw: &str) -> Vec<(String, String)> {
    raw.trim_start_matches(&['?', '#'][..])
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode(key), decode(value))
        })
        .collect()
}

fn decode(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|value| value.into_owned())
        .unwrap_or(spaced)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl RedirectResult {
    pub fn empty() -> Self {
        Self {
            provider: None,
            payload: RedirectPayload::Empty,
            error: None,
        }
    }

    /// Tokens already obtained by the caller, e.g. from a login exchange.
    pub fn with_tokens(
        provider: Provider,
        access_token: String,
        refresh_token: Option<String>,
    ) -> Self {
        Self {
            provider: Some(provider),
            payload: RedirectPayload::Fragment {
                provider_token: access_token,
                provider_refresh_token: refresh_token,
            },
            error: None,
        }
    }

    /// Builds the result from the raw query string and fragment of the
    /// redirect URL. An authorization code wins over fragment tokens.
    pub fn from_url_parts(query: Option<&str>, fragment: Option<&str>) -> Self {
        let mut params = query.map(parse_pairs).unwrap_or_default();
        params.extend(fragment.map(parse_pairs).unwrap_or_default());

        let take = |name: &str| {
            non_empty(
                params
                    .iter()
                    .find(|(key, _)| key == name)
                    .map(|(_, value)| value.clone()),
            )
        };

        let provider = take("provider").and_then(|p| p.parse::<Provider>().ok());
        let error = take("error_description").or_else(|| take("error"));

        let payload = if let Some(code) = take("code") {
            RedirectPayload::AuthorizationCode {
                code,
                state: take("state"),
            }
        } else if let Some(provider_token) = take("provider_token") {
            RedirectPayload::Fragment {
                provider_token,
                provider_refresh_token: take("provider_refresh_token"),
            }
        } else {
            RedirectPayload::Empty
        };

        Self {
            provider,
            payload,
            error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum IgnoreReason {
    NoPayload,
    ProviderMismatch {
        requested: Provider,
        found: Provider,
    },
    ProviderRefused {
        message: String,
    },
    MissingState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectPlan {
    /// Swap the code for tokens using the verifier stored under `state`.
    ExchangeCode { code: String, state: String },
    /// Verify whose token it is before storing it.
    VerifyToken {
        access_token: String,
        refresh_token: Option<String>,
    },
    Ignore(IgnoreReason),
}

/// Decides how a redirect should be handled when linking `requested`.
pub fn plan_redirect(requested: Provider, redirect: &RedirectResult) -> RedirectPlan {
    if let Some(found) = redirect.provider {
        if found != requested {
            return RedirectPlan::Ignore(IgnoreReason::ProviderMismatch { requested, found });
        }
    }
    if let Some(message) = &redirect.error {
        return RedirectPlan::Ignore(IgnoreReason::ProviderRefused {
            message: message.clone(),
        });
    }

    match &redirect.payload {
        RedirectPayload::AuthorizationCode { code, state } => match state {
            Some(state) => RedirectPlan::ExchangeCode {
                code: code.clone(),
                state: state.clone(),
            },
            None => RedirectPlan::Ignore(IgnoreReason::MissingState),
        },
        RedirectPayload::Fragment {
            provider_token,
            provider_refresh_token,
        } => RedirectPlan::VerifyToken {
            access_token: provider_token.clone(),
            refresh_token: provider_refresh_token.clone(),
        },
        RedirectPayload::Empty => RedirectPlan::Ignore(IgnoreReason::NoPayload),
    }
}
