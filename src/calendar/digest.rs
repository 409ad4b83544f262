//! Calendar message formatting (Telegram HTML)

use chrono::NaiveDate;
use html_escape::encode_text;
use std::collections::BTreeMap;

use crate::schemas::{CalendarEvent, Impact};

/// Digest grouped by calendar day (UTC), days ascending, events
/// chronological within a day. Holidays are listed without a time.
pub fn format_digest(heading: &str, events: &[CalendarEvent]) -> String {
    let mut days: BTreeMap<NaiveDate, Vec<&CalendarEvent>> = BTreeMap::new();
    for event in events {
        days.entry(event.day()).or_default().push(event);
    }

    let mut out = format!("<b>{}</b>", encode_text(heading));
    for (day, mut day_events) in days {
        day_events.sort_by(|a, b| a.date_time.cmp(&b.date_time).then_with(|| a.id.cmp(&b.id)));

        out.push_str(&format!("\n\n<b>{}</b>", day.format("%A, %d %B")));
        for event in day_events {
            out.push('\n');
            out.push_str(&event_line(event));
        }
    }
    out
}

fn event_line(event: &CalendarEvent) -> String {
    let mut line = String::new();
    if event.impact != Impact::Holiday {
        line.push_str(&event.date_time.format("%H:%M ").to_string());
    }
    if !event.currency.is_empty() {
        line.push_str(&format!("{} ", encode_text(&event.currency)));
    }
    line.push_str(&encode_text(&event.title));

    match event.impact {
        Impact::Holiday => line.push_str(" (holiday)"),
        Impact::High => line.push_str(" ❗"),
        _ => {}
    }

    let details: Vec<String> = [("forecast", &event.forecast), ("previous", &event.previous)]
        .into_iter()
        .filter_map(|(label, value)| value.as_ref().map(|v| format!("{label} {}", encode_text(v))))
        .collect();
    if !details.is_empty() {
        line.push_str(&format!(" ({})", details.join(", ")));
    }
    line
}

/// Parses figures like `3.5%`, `-0.2`, `1,250K` or `2.1B` into a number
pub fn parse_figure(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .trim()
        .trim_end_matches(|c: char| matches!(c, '%' | 'K' | 'M' | 'B' | 'T' | 'k' | 'm' | 'b' | 't'))
        .chars()
        .filter(|c| *c != ',')
        .collect();
    cleaned.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Percent change from `previous` to `actual`, when both are numeric and
/// `previous` is non-zero
pub fn percent_change(actual: &str, previous: &str) -> Option<f64> {
    let actual = parse_figure(actual)?;
    let previous = parse_figure(previous)?;
    if previous == 0.0 {
        return None;
    }
    Some((actual - previous) / previous.abs() * 100.0)
}

/// One message for events of a single currency whose actual value just came out
pub fn format_update(currency: &str, events: &[CalendarEvent]) -> String {
    let mut out = format!("<b>{} data released</b>", encode_text(currency));

    for event in events {
        let actual = event.actual.as_deref().unwrap_or_default();
        out.push_str(&format!("\n{}: {}", encode_text(&event.title), encode_text(actual)));

        let mut details = Vec::new();
        if let Some(forecast) = &event.forecast {
            details.push(format!("forecast {}", encode_text(forecast)));
        }
        if let Some(previous) = &event.previous {
            match percent_change(actual, previous) {
                Some(change) => details.push(format!("previous {}, {:+.2}%", encode_text(previous), change)),
                None => details.push(format!("previous {}", encode_text(previous))),
            }
        }
        if !details.is_empty() {
            out.push_str(&format!(" ({})", details.join("; ")));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn event(id: &str, title: &str, day: u32, hour: u32, impact: Impact) -> CalendarEvent {
        CalendarEvent {
            id: id.to_string(),
            title: title.to_string(),
            country: "US".to_string(),
            currency: "USD".to_string(),
            date_time: Utc.with_ymd_and_hms(2024, 5, day, hour, 30, 0).unwrap(),
            impact,
            actual: None,
            forecast: None,
            previous: None,
        }
    }

    #[test]
    fn test_digest_groups_by_day_in_order() {
        let mut cpi = event("3", "CPI m/m", 2, 12, Impact::High);
        cpi.forecast = Some("0.3%".to_string());
        let events = vec![
            cpi,
            event("2", "ISM Manufacturing", 1, 14, Impact::Medium),
            event("1", "Bank Holiday", 1, 0, Impact::Holiday),
        ];

        let digest = format_digest("Week ahead", &events);

        assert_eq!(
            digest,
            "<b>Week ahead</b>\n\n\
             <b>Wednesday, 01 May</b>\n\
             USD Bank Holiday (holiday)\n\
             14:30 USD ISM Manufacturing\n\n\
             <b>Thursday, 02 May</b>\n\
             12:30 USD CPI m/m ❗ (forecast 0.3%)"
        );
    }

    #[test]
    fn test_parse_figure() {
        assert_eq!(parse_figure("3.5%"), Some(3.5));
        assert_eq!(parse_figure("1,250K"), Some(1250.0));
        assert_eq!(parse_figure("-0.2"), Some(-0.2));
        assert_eq!(parse_figure("n/a"), None);
    }

    #[test]
    fn test_percent_change() {
        let change = percent_change("275K", "250K").unwrap();
        assert!((change - 10.0).abs() < 1e-9);

        let from_negative = percent_change("-0.1", "-0.2").unwrap();
        assert!((from_negative - 50.0).abs() < 1e-9);

        assert_eq!(percent_change("1.0", "0"), None);
        assert_eq!(percent_change("tbd", "1.0"), None);
    }

    #[test]
    fn test_format_update() {
        let mut nfp = event("1", "Nonfarm Payrolls", 3, 12, Impact::High);
        nfp.actual = Some("275K".to_string());
        nfp.previous = Some("250K".to_string());

        let message = format_update("USD", &[nfp]);
        assert_eq!(
            message,
            "<b>USD data released</b>\nNonfarm Payrolls: 275K (previous 250K, +10.00%)"
        );
    }
}
