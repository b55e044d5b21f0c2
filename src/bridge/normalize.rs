//! Relay server and URL clean-up for bridge responses

use std::borrow::Cow;

/// Rewrite TURN endpoints whose host name embeds an IPv4 address
///
/// Kinesis-style relays hand out hosts like
/// `turn:54-201-33-198.t-4f2a.kinesisvideo.us-west-2.amazonaws.com:443?transport=udp`,
/// which not every resolver can look up. The address is taken from the
/// hyphened octets instead: `turn:54.201.33.198:443?transport=udp`.
/// Anything else is returned unchanged.
pub fn normalize_endpoint(url: &str) -> String {
    let (scheme, rest) = if let Some(rest) = url.strip_prefix("turns:") {
        ("turns:", rest)
    } else if let Some(rest) = url.strip_prefix("turn:") {
        ("turn:", rest)
    } else {
        return url.to_string();
    };

    let Some(port_at) = rest.find(':') else {
        return url.to_string();
    };
    let (host, tail) = rest.split_at(port_at);

    let Some((ip_part, domain)) = host.split_once('.') else {
        return url.to_string();
    };
    if !domain.starts_with("t-") || domain.len() <= 2 {
        return url.to_string();
    }

    let octets: Vec<&str> = ip_part.split('-').collect();
    let all_numeric = octets
        .iter()
        .all(|o| !o.is_empty() && o.bytes().all(|b| b.is_ascii_digit()));
    if octets.len() != 4 || !all_numeric {
        return url.to_string();
    }

    format!("{}{}{}", scheme, octets.join("."), tail)
}

/// Decode a signaling URL that arrived fully percent-encoded
///
/// Some bridge versions pass the whole relay URL through still encoded
/// (`wss%3A%2F%2F...`). A URL that already has a `://` scheme separator is
/// returned untouched: its presigned query values must stay encoded.
/// Undecodable input is returned as-is.
pub fn decode_relay_url(url: &str) -> String {
    let lower = url.to_ascii_lowercase();
    let fully_encoded =
        lower.starts_with("ws%3a") || lower.starts_with("wss%3a") || !url.contains("://");
    if !fully_encoded {
        return url.to_string();
    }

    match urlencoding::decode(url) {
        Ok(Cow::Borrowed(s)) => s.to_string(),
        Ok(Cow::Owned(s)) => s,
        Err(_) => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_kinesis_turn_host() {
        assert_eq!(
            normalize_endpoint(
                "turn:54-201-33-198.t-4f2a9b.kinesisvideo.us-west-2.amazonaws.com:443?transport=udp"
            ),
            "turn:54.201.33.198:443?transport=udp"
        );
        assert_eq!(
            normalize_endpoint("turns:10-0-0-7.t-abc.kinesisvideo.eu-west-1.amazonaws.com:443?transport=tcp"),
            "turns:10.0.0.7:443?transport=tcp"
        );
    }

    #[test]
    fn test_normalize_leaves_other_endpoints() {
        for url in [
            "stun:stun.kinesisvideo.us-west-2.amazonaws.com:443",
            "turn:turn.example.com:3478",
            "turn:54-201-33.t-abc.example:443",
            "turn:54-201-33-198.example.com:443",
            "turn:54-201-33-198.t-abc.example",
            "turn:a-b-c-d.t-abc.example:443",
        ] {
            assert_eq!(normalize_endpoint(url), url);
        }
    }

    #[test]
    fn test_decode_relay_url() {
        assert_eq!(
            decode_relay_url("wss%3A%2F%2Frelay.example%2F%3FX-Amz-ChannelARN%3Darn"),
            "wss://relay.example/?X-Amz-ChannelARN=arn"
        );
        assert_eq!(decode_relay_url("wss://relay/x"), "wss://relay/x");
    }

    #[test]
    fn test_presigned_relay_url_kept_encoded() {
        let url = "wss://v-1a2b3c4d.kinesisvideo.us-west-2.amazonaws.com/?X-Amz-ChannelARN=arn%3Aaws%3Akinesisvideo%3Aus-west-2%3A1%3Achannel%2Fcam&X-Amz-Credential=ASIA%2F20240101%2Fus-west-2%2Fkinesisvideo%2Faws4_request&X-Amz-Security-Token=IQo%2Babc%3D%3D&X-Amz-Signature=0f1e";
        assert_eq!(decode_relay_url(url), url);
    }
}
