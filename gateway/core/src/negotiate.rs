//! Content Negotiation
//!
//! Picks the response representation from the request's `Accept` header.
//! Entries are tried from highest to lowest quality (ties keep header
//! order); the first entry matching an offered media type wins. Wildcards
//! match the first offer they cover.

/// HAL+JSON documents
pub const MIME_HAL: &str = "application/hal+json";

/// Plain JSON documents
pub const MIME_JSON: &str = "application/json";

/// Server-Sent-Events streams
pub const MIME_EVENT_STREAM: &str = "text/event-stream";

/// Raw bytes
pub const MIME_RAW: &str = "application/octet-stream";

/// Media types the gateway can produce, in preference order
const OFFERS: [(&str, Representation); 4] = [
    (MIME_HAL, Representation::Document),
    (MIME_JSON, Representation::Document),
    (MIME_EVENT_STREAM, Representation::EventStream),
    (MIME_RAW, Representation::Raw),
];

/// Negotiated response representation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Representation {
    /// Structured document
    Document,
    /// Raw bytes
    Raw,
    /// Event stream
    EventStream,
    /// Nothing the client accepts can be produced
    Unsupported,
}

impl Representation {
    /// Content type for a successful response in this representation
    #[must_use]
    pub fn content_type(self) -> Option<&'static str> {
        match self {
            Self::Document => Some(MIME_HAL),
            Self::Raw => Some(MIME_RAW),
            Self::EventStream => Some(MIME_EVENT_STREAM),
            Self::Unsupported => None,
        }
    }
}

struct MediaRange<'a> {
    kind: &'a str,
    subtype: &'a str,
    quality: f32,
}

impl MediaRange<'_> {
    fn matches(&self, offer: &str) -> bool {
        let Some((kind, subtype)) = offer.split_once('/') else {
            return false;
        };
        (self.kind == "*" || self.kind.eq_ignore_ascii_case(kind))
            && (self.subtype == "*" || self.subtype.eq_ignore_ascii_case(subtype))
    }
}

fn parse_range(entry: &str) -> Option<MediaRange<'_>> {
    let mut parts = entry.split(';').map(str::trim);
    let (kind, subtype) = parts.next()?.split_once('/')?;
    if kind.is_empty() || subtype.is_empty() || (kind == "*" && subtype != "*") {
        return None;
    }

    let mut quality = 1.0;
    for param in parts {
        if let Some((name, value)) = param.split_once('=') {
            if name.trim().eq_ignore_ascii_case("q") {
                quality = value.trim().parse::<f32>().ok()?.clamp(0.0, 1.0);
            }
        }
    }

    Some(MediaRange {
        kind: kind.trim(),
        subtype: subtype.trim(),
        quality,
    })
}

/// Representation for an `Accept` header value
///
/// A missing or blank header negotiates a document.
#[must_use]
pub fn negotiate(accept: Option<&str>) -> Representation {
    let accept = match accept.map(str::trim) {
        None | Some("") => return Representation::Document,
        Some(accept) => accept,
    };

    let mut ranges: Vec<MediaRange<'_>> = accept.split(',').filter_map(parse_range).collect();
    // Stable: equal qualities keep header order.
    ranges.sort_by(|a, b| b.quality.total_cmp(&a.quality));

    ranges
        .iter()
        .filter(|range| range.quality > 0.0)
        .find_map(|range| {
            OFFERS
                .iter()
                .find(|(offer, _)| range.matches(offer))
                .map(|(_, representation)| *representation)
        })
        .unwrap_or(Representation::Unsupported)
}
