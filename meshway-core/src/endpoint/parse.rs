//! URI grammar for physical, logical, and abstract endpoints.
//!
//! Accepted forms:
//! - `physical://host[:port](/segment)*(?query)?` with query pairs
//!   `o=<objectID>`, `c=<channelHint>`, and the bare `broadcast` token
//! - `logical://seg(/seg)*(?broadcast)?` with `*` only as the entire last
//!   segment
//! - `abstract://name`, resolved against the loaded abstract map
//!
//! Input is lowercased and right-trimmed of `/` before parsing, so the
//! canonical form of a parsed endpoint re-parses to the same value.

use super::abstract_map::AbstractMap;
use super::{Endpoint, EndpointError, Kind, WILDCARD};

pub(super) fn parse(
    uri: &str,
    max_depth: usize,
    map: &AbstractMap,
) -> Result<Endpoint, EndpointError> {
    let lowered = uri.trim().to_ascii_lowercase();

    if let Some(rest) = lowered.strip_prefix("physical://") {
        parse_physical(&lowered, rest, max_depth)
    } else if let Some(rest) = lowered.strip_prefix("logical://") {
        parse_logical(&lowered, rest)
    } else if let Some(rest) = lowered.strip_prefix("abstract://") {
        parse_abstract(&lowered, rest, map)
    } else {
        Err(EndpointError::invalid(
            &lowered,
            "expected physical://, logical://, or abstract:// scheme",
        ))
    }
}

fn parse_physical(uri: &str, rest: &str, max_depth: usize) -> Result<Endpoint, EndpointError> {
    let (path, query) = split_query(rest);
    let path = path.trim_end_matches('/');

    let mut parts = path.split('/');
    let authority = parts.next().unwrap_or("");
    let (host, port) = parse_authority(uri, authority)?;

    let mut segments = Vec::new();
    for seg in parts {
        if seg.is_empty() {
            return Err(EndpointError::invalid(uri, "empty path segment"));
        }
        if seg == WILDCARD || seg.contains('*') {
            return Err(EndpointError::invalid(
                uri,
                "wildcards are not allowed in physical endpoints",
            ));
        }
        validate_segment(uri, seg)?;
        segments.push(seg.to_string());
    }

    if segments.len() > max_depth {
        return Err(EndpointError::invalid(
            uri,
            format!("physical hierarchy deeper than {max_depth} levels"),
        ));
    }

    let mut object_id = None;
    let mut channel_hint = None;
    let mut broadcast = false;
    for item in query_items(query) {
        match item {
            ("o", Some(v)) if !v.is_empty() => object_id = Some(v.to_string()),
            ("c", Some(v)) if !v.is_empty() => channel_hint = Some(v.to_string()),
            ("broadcast", None) => broadcast = true,
            (key, _) => {
                return Err(EndpointError::invalid(
                    uri,
                    format!("unrecognized query item `{key}`"),
                ));
            }
        }
    }

    // A frame with neither root nor segments must at least name a channel,
    // otherwise it addresses nothing.
    if host.is_empty() && segments.is_empty() && channel_hint.is_none() {
        return Err(EndpointError::invalid(
            uri,
            "physical endpoint has no root, segments, or channel hint",
        ));
    }

    Ok(Endpoint {
        kind: Kind::Physical {
            root_host: host,
            root_port: port,
            object_id,
            channel_hint,
        },
        segments,
        broadcast,
        cached: Default::default(),
        sealed: Default::default(),
    })
}

fn parse_logical(uri: &str, rest: &str) -> Result<Endpoint, EndpointError> {
    let (path, query) = split_query(rest);
    let path = path.trim_end_matches('/');

    if path.is_empty() {
        return Err(EndpointError::invalid(uri, "logical endpoint has no segments"));
    }

    let raw: Vec<&str> = path.split('/').collect();
    let mut segments = Vec::with_capacity(raw.len());
    for (i, seg) in raw.iter().enumerate() {
        if seg.is_empty() {
            return Err(EndpointError::invalid(uri, "empty path segment"));
        }
        if seg.contains('*') {
            // `*` must stand alone, and only in the final segment.
            if *seg != WILDCARD || i != raw.len() - 1 {
                return Err(EndpointError::invalid(
                    uri,
                    "`*` is only valid as the entire final segment",
                ));
            }
        } else {
            validate_segment(uri, seg)?;
        }
        segments.push((*seg).to_string());
    }

    let mut broadcast = false;
    for item in query_items(query) {
        match item {
            ("broadcast", None) => broadcast = true,
            (key, _) => {
                return Err(EndpointError::invalid(
                    uri,
                    format!("unrecognized query item `{key}`"),
                ));
            }
        }
    }

    Ok(Endpoint {
        kind: Kind::Logical,
        segments,
        broadcast,
        cached: Default::default(),
        sealed: Default::default(),
    })
}

fn parse_abstract(uri: &str, rest: &str, map: &AbstractMap) -> Result<Endpoint, EndpointError> {
    let name = rest.trim_end_matches('/');
    if name.is_empty() {
        return Err(EndpointError::invalid(uri, "abstract endpoint has no name"));
    }

    if let Some(ep) = map.resolve(name) {
        return Ok(ep);
    }

    // Unmapped abstract names degrade to logical endpoints of the same name.
    parse_logical(uri, name)
}

fn parse_authority(uri: &str, authority: &str) -> Result<(String, u16), EndpointError> {
    if authority.is_empty() {
        return Ok((String::new(), 0));
    }

    let (host, port) = match authority.split_once(':') {
        Some((h, p)) => {
            let port: u16 = p
                .parse()
                .map_err(|_| EndpointError::invalid(uri, format!("invalid port `{p}`")))?;
            (h, port)
        }
        None => (authority, 0),
    };

    if host.is_empty() {
        return Err(EndpointError::invalid(uri, "port without a host"));
    }
    if !host
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
    {
        return Err(EndpointError::invalid(uri, format!("invalid host `{host}`")));
    }

    Ok((host.to_string(), port))
}

fn split_query(rest: &str) -> (&str, Option<&str>) {
    match rest.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (rest, None),
    }
}

fn query_items(query: Option<&str>) -> impl Iterator<Item = (&str, Option<&str>)> {
    query
        .unwrap_or("")
        .split('&')
        .filter(|s| !s.is_empty())
        .map(|item| match item.split_once('=') {
            Some((k, v)) => (k, Some(v)),
            None => (item, None),
        })
}

pub(super) fn validate_segment(uri: &str, seg: &str) -> Result<(), EndpointError> {
    if seg
        .chars()
        .any(|c| matches!(c, '/' | '?' | '&' | '=' | '#' | '*') || c.is_whitespace())
    {
        return Err(EndpointError::invalid(
            uri,
            format!("invalid characters in segment `{seg}`"),
        ));
    }
    Ok(())
}
