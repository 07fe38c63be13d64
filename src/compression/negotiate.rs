//! permessage-deflate offer parsing and parameter agreement.

use std::collections::HashSet;

use super::deflate::MIN_COMPRESS_WINDOW_BITS;
use super::{CompressionParams, CompressionState, EXTENSION_NAME, MAX_WINDOW_BITS, MIN_WINDOW_BITS};
use crate::config::CompressionConfig;

/// One extension listed in `Sec-WebSocket-Extensions`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionOffer {
    pub name: String,
    pub params: Vec<(String, Option<String>)>,
}

/// Split every `Sec-WebSocket-Extensions` value into individual offers, in
/// the client's order of preference.
pub fn parse_offers<'a, I>(values: I) -> Vec<ExtensionOffer>
where
    I: IntoIterator<Item = &'a str>,
{
    values
        .into_iter()
        .flat_map(|value| value.split(','))
        .filter_map(|offer| {
            let mut parts = offer.split(';').map(str::trim);
            let name = parts.next().filter(|name| !name.is_empty())?;
            let params = parts
                .filter(|param| !param.is_empty())
                .map(|param| match param.split_once('=') {
                    Some((key, value)) => (
                        key.trim().to_ascii_lowercase(),
                        Some(value.trim().trim_matches('"').to_string()),
                    ),
                    None => (param.to_ascii_lowercase(), None),
                })
                .collect();
            Some(ExtensionOffer {
                name: name.to_ascii_lowercase(),
                params,
            })
        })
        .collect()
}

/// Agree on compression parameters for a link.
///
/// Returns `None` when compression is disabled or no offer is acceptable;
/// the link then runs uncompressed.
pub fn negotiate(config: &CompressionConfig, offers: &[ExtensionOffer]) -> Option<CompressionState> {
    if !config.enabled {
        return None;
    }

    offers
        .iter()
        .filter(|offer| offer.name == EXTENSION_NAME)
        .find_map(|offer| {
            let accepted = accept(config, offer);
            if accepted.is_none() {
                tracing::debug!(params = ?offer.params, "Skipping unacceptable deflate offer");
            }
            accepted
        })
        .map(|params| CompressionState {
            params,
            level: config.level,
        })
}

fn accept(config: &CompressionConfig, offer: &ExtensionOffer) -> Option<CompressionParams> {
    let mut seen = HashSet::new();
    let mut requested_server_bits = None;
    let mut client_bits_offered = false;
    let mut requested_client_bits = None;
    let mut server_no_context = false;
    let mut client_no_context = false;

    for (key, value) in &offer.params {
        if !seen.insert(key.as_str()) {
            return None;
        }
        match key.as_str() {
            "server_no_context_takeover" if value.is_none() => server_no_context = true,
            "client_no_context_takeover" if value.is_none() => client_no_context = true,
            "server_max_window_bits" => {
                requested_server_bits = Some(parse_window_bits(value.as_deref()?)?);
            }
            "client_max_window_bits" => {
                client_bits_offered = true;
                if let Some(value) = value {
                    requested_client_bits = Some(parse_window_bits(value)?);
                }
            }
            _ => return None,
        }
    }

    let server_bits = requested_server_bits
        .unwrap_or(MAX_WINDOW_BITS)
        .min(config.server_max_window);
    if server_bits < MIN_COMPRESS_WINDOW_BITS {
        return None;
    }

    // The client's window can only be limited if it said it accepts a limit.
    // A limit below what the deflate backend can honour declines the offer,
    // as for the server window.
    let client_bits = if client_bits_offered {
        let bits = requested_client_bits
            .unwrap_or(MAX_WINDOW_BITS)
            .min(config.client_max_window);
        if bits < MIN_COMPRESS_WINDOW_BITS {
            return None;
        }
        Some(bits)
    } else {
        None
    };

    Some(CompressionParams {
        server_max_window_bits: server_bits,
        client_max_window_bits: client_bits,
        server_no_context_takeover: server_no_context || config.server_no_context,
        client_no_context_takeover: client_no_context || config.client_no_context,
    })
}

fn parse_window_bits(value: &str) -> Option<u8> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value
        .parse::<u8>()
        .ok()
        .filter(|bits| (MIN_WINDOW_BITS..=MAX_WINDOW_BITS).contains(bits))
}
