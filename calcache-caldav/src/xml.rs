//! WebDAV/CalDAV request bodies and multistatus parsing.
//!
//! Elements are matched by local name only; servers disagree on prefixes.

use calcache_core::error::{CalError, CalResult};
use calcache_core::remote::{CalendarInfo, ObjectFilter, RawObject, SyncDelta};
use chrono::{DateTime, Utc};
use roxmltree::{Document, Node};

const CALDAV_TIME_FORMAT: &str = "%Y%m%dT%H%M%SZ";

pub const CURRENT_USER_PRINCIPAL: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:propfind xmlns:d="DAV:">
  <d:prop>
    <d:current-user-principal/>
  </d:prop>
</d:propfind>"#;

pub const CALENDAR_HOME_SET: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:propfind xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">
  <d:prop>
    <c:calendar-home-set/>
  </d:prop>
</d:propfind>"#;

pub const CALENDAR_PROPERTIES: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:propfind xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">
  <d:prop>
    <d:resourcetype/>
    <d:displayname/>
    <c:calendar-description/>
    <c:max-resource-size/>
    <c:supported-calendar-component-set/>
  </d:prop>
</d:propfind>"#;

pub fn calendar_query(filter: &ObjectFilter) -> String {
    let time_range = match (filter.start, filter.end) {
        (None, None) => String::new(),
        (start, end) => {
            let mut attrs = String::new();
            if let Some(start) = start {
                attrs.push_str(&format!(r#" start="{}""#, caldav_time(start)));
            }
            if let Some(end) = end {
                attrs.push_str(&format!(r#" end="{}""#, caldav_time(end)));
            }
            format!("\n        <c:time-range{attrs}/>")
        }
    };

    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<c:calendar-query xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">
  <d:prop>
    <d:getetag/>
    <c:calendar-data/>
  </d:prop>
  <c:filter>
    <c:comp-filter name="VCALENDAR">
      <c:comp-filter name="VEVENT">{time_range}
      </c:comp-filter>
    </c:comp-filter>
  </c:filter>
</c:calendar-query>"#
    )
}

pub fn sync_collection(sync_token: &str) -> String {
    let token = if sync_token.is_empty() {
        "<d:sync-token/>".to_string()
    } else {
        format!("<d:sync-token>{}</d:sync-token>", escape(sync_token))
    };

    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<d:sync-collection xmlns:d="DAV:">
  {token}
  <d:sync-level>1</d:sync-level>
  <d:prop>
    <d:getetag/>
  </d:prop>
</d:sync-collection>"#
    )
}

pub fn calendar_multiget(paths: &[String]) -> String {
    let hrefs: String = paths
        .iter()
        .map(|path| format!("\n  <d:href>{}</d:href>", escape(path)))
        .collect();

    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<c:calendar-multiget xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">
  <d:prop>
    <d:getetag/>
    <c:calendar-data/>
  </d:prop>{hrefs}
</c:calendar-multiget>"#
    )
}

/// The href inside the first `property` element, e.g. the principal of
/// `current-user-principal`.
pub fn href_property(xml: &str, property: &str) -> CalResult<Option<String>> {
    let doc = parse(xml)?;
    let href = doc
        .descendants()
        .find(|n| is(n, property))
        .and_then(|prop| prop.descendants().find(|n| is(n, "href")))
        .and_then(text)
        .map(normalize_href);
    Ok(href)
}

/// Calendar collections of a Depth: 1 PROPFIND; plain collections are skipped.
pub fn calendars(xml: &str) -> CalResult<Vec<CalendarInfo>> {
    let doc = parse(xml)?;
    let mut found = Vec::new();

    for response in responses(&doc) {
        let Some(path) = child(response, "href").and_then(text).map(normalize_href) else {
            continue;
        };
        let is_calendar = response
            .descendants()
            .find(|n| is(n, "resourcetype"))
            .is_some_and(|rt| rt.children().any(|n| is(&n, "calendar")));
        if !is_calendar {
            continue;
        }

        let property = |name: &str| {
            response
                .descendants()
                .find(|n| is(n, name))
                .and_then(text)
                .filter(|s| !s.is_empty())
        };

        found.push(CalendarInfo {
            path,
            name: property("displayname"),
            description: property("calendar-description"),
            max_resource_size: property("max-resource-size").and_then(|s| s.parse().ok()),
            supported_components: response
                .descendants()
                .filter(|n| is(n, "comp"))
                .filter_map(|n| n.attribute("name"))
                .map(str::to_string)
                .collect(),
        });
    }

    Ok(found)
}

/// Resources carrying calendar-data, from a calendar-query or multiget REPORT.
pub fn resources(xml: &str) -> CalResult<Vec<RawObject>> {
    let doc = parse(xml)?;
    let mut found = Vec::new();

    for response in responses(&doc) {
        let Some(path) = child(response, "href").and_then(text).map(normalize_href) else {
            continue;
        };
        let data = response
            .descendants()
            .find(|n| is(n, "calendar-data"))
            .and_then(text);
        let Some(data) = data else { continue };

        found.push(RawObject {
            path,
            data,
            etag: response
                .descendants()
                .find(|n| is(n, "getetag"))
                .and_then(text),
        });
    }

    Ok(found)
}

/// A sync-collection multistatus: responses with a 404 status are deletions,
/// everything else an update.
pub fn sync_delta(xml: &str) -> CalResult<SyncDelta> {
    let doc = parse(xml)?;
    let mut delta = SyncDelta::default();

    for response in responses(&doc) {
        let Some(path) = child(response, "href").and_then(text).map(normalize_href) else {
            continue;
        };
        let gone = child(response, "status")
            .and_then(text)
            .is_some_and(|status| status.split_whitespace().nth(1) == Some("404"));
        if gone {
            delta.deleted.push(path);
        } else if !path.ends_with('/') {
            // the collection itself can appear in the listing
            delta.updated.push(path);
        }
    }

    delta.next_sync_token = doc
        .root_element()
        .children()
        .find(|n| is(n, "sync-token"))
        .and_then(text)
        .ok_or_else(|| CalError::Remote("sync-collection response has no sync-token".into()))?;

    Ok(delta)
}

fn parse(xml: &str) -> CalResult<Document<'_>> {
    Document::parse(xml).map_err(|e| CalError::Remote(format!("invalid multistatus: {e}")))
}

fn responses<'a, 'input>(doc: &'a Document<'input>) -> impl Iterator<Item = Node<'a, 'input>> {
    doc.root_element().children().filter(|n| is(n, "response"))
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children().find(|n| is(n, name))
}

fn is(node: &Node, name: &str) -> bool {
    node.is_element() && node.tag_name().name() == name
}

fn text(node: Node) -> Option<String> {
    node.text().map(|t| t.trim().to_string())
}

/// Servers may answer with absolute URLs; the rest of calcache works with paths.
fn normalize_href(href: String) -> String {
    match url::Url::parse(&href) {
        Ok(url) => url.path().to_string(),
        Err(_) => href,
    }
}

fn caldav_time(instant: DateTime<Utc>) -> String {
    instant.format(CALDAV_TIME_FORMAT).to_string()
}

fn escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
