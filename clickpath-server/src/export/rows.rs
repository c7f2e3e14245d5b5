//! Session to spreadsheet row conversion

use chrono::{DateTime, Utc};
use clickpath_common::time::format_export;
use clickpath_common::ClickSession;

use crate::sheets::Row;

/// Value written for any missing field
pub const MISSING: &str = "N/A";

/// Header row, in column order
pub const COLUMNS: [&str; 14] = [
    "Timestamp",
    "Phone Number",
    "Source",
    "Medium",
    "Campaign",
    "Content",
    "Placement",
    "Engaged",
    "Engaged At",
    "Attribution Method",
    "Contact Id",
    "Conversation Id",
    "Contact Name",
    "Last Message",
];

/// Last column letter of the table, for A1 ranges
pub const LAST_COLUMN: char = 'N';

pub fn header_row() -> Row {
    COLUMNS.iter().map(|c| c.to_string()).collect()
}

/// Fixed-width row for one session; every cell is populated
pub fn session_to_row(session: &ClickSession, message_max_chars: usize) -> Row {
    let attrs = &session.attributes;
    vec![
        format_export(&session.created_at),
        text(Some(&session.phone_number)),
        text(Some(&attrs.source)),
        text(Some(&attrs.medium)),
        text(Some(&attrs.campaign)),
        text(Some(&attrs.content)),
        text(Some(&attrs.placement)),
        if session.has_engaged { "Y" } else { "N" }.to_string(),
        timestamp(session.engaged_at.as_ref()),
        text(session.attribution_method.as_ref().map(|m| m.as_str())),
        text(session.contact_id.as_deref()),
        text(session.conversation_id.as_deref()),
        text(session.contact_name.as_deref()),
        session
            .last_message_text
            .as_deref()
            .map(|m| message_cell(m, message_max_chars))
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| MISSING.to_string()),
    ]
}

fn text(value: Option<&str>) -> String {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(MISSING)
        .to_string()
}

fn timestamp(value: Option<&DateTime<Utc>>) -> String {
    value.map(format_export).unwrap_or_else(|| MISSING.to_string())
}

/// Collapse whitespace runs (newlines included) and cap the length in chars
pub fn message_cell(message: &str, max_chars: usize) -> String {
    let collapsed = message.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max_chars {
        return collapsed;
    }
    let mut truncated: String = collapsed.chars().take(max_chars.saturating_sub(1)).collect();
    truncated.push('…');
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use clickpath_common::{AttributionMethod, Attributes};

    fn bare_session() -> ClickSession {
        ClickSession {
            session_id: "s1".to_string(),
            attributes: Attributes::default(),
            phone_number: String::new(),
            has_engaged: false,
            synced_to_export: false,
            created_at: Utc.with_ymd_and_hms(2024, 3, 1, 9, 5, 7).unwrap(),
            engaged_at: None,
            exported_at: None,
            last_message_text: None,
            contact_id: None,
            conversation_id: None,
            contact_name: None,
            attribution_method: None,
        }
    }

    #[test]
    fn test_header_matches_column_count() {
        assert_eq!(header_row().len(), 14);
        assert_eq!(COLUMNS[0], "Timestamp");
        assert_eq!(COLUMNS[13], "Last Message");
    }

    #[test]
    fn test_missing_fields_fall_back() {
        let row = session_to_row(&bare_session(), 500);
        assert_eq!(row.len(), COLUMNS.len());
        assert_eq!(row[0], "2024-03-01 09:05:07");
        assert_eq!(row[1], MISSING);
        assert_eq!(row[2], "direct");
        assert_eq!(row[7], "N");
        for idx in [8, 9, 10, 11, 12, 13] {
            assert_eq!(row[idx], MISSING, "column {}", COLUMNS[idx]);
        }
        assert!(row.iter().all(|cell| !cell.is_empty()));
    }

    #[test]
    fn test_engaged_session_row() {
        let mut s = bare_session();
        s.phone_number = "919876543210".to_string();
        s.has_engaged = true;
        s.engaged_at = Some(Utc.with_ymd_and_hms(2024, 3, 1, 9, 6, 0).unwrap());
        s.attribution_method = Some(AttributionMethod::ChannelId);
        s.contact_name = Some("Asha".to_string());
        s.last_message_text = Some("hello\nthere".to_string());

        let row = session_to_row(&s, 500);
        assert_eq!(row[1], "919876543210");
        assert_eq!(row[7], "Y");
        assert_eq!(row[8], "2024-03-01 09:06:00");
        assert_eq!(row[9], "channel_id");
        assert_eq!(row[12], "Asha");
        assert_eq!(row[13], "hello there");
    }

    #[test]
    fn test_message_truncation() {
        assert_eq!(message_cell("abcdef", 6), "abcdef");
        assert_eq!(message_cell("abcdefg", 6), "abcde…");
        assert_eq!(message_cell("ééééé", 3), "éé…");
        assert_eq!(message_cell("a\r\n\r\nb  c", 500), "a b c");
    }

    #[test]
    fn test_whitespace_only_message_is_missing() {
        let mut s = bare_session();
        s.last_message_text = Some(" \n ".to_string());
        assert_eq!(session_to_row(&s, 500)[13], MISSING);
    }
}
