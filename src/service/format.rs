use crate::catalog::parse_date;

/// Thousands-separated number with up to three decimals; `-` when there is no number.
pub fn format_number(value: Option<f64>) -> String {
    let Some(value) = value.filter(|v| v.is_finite()) else {
        return "-".to_string();
    };

    let rounded = (value.abs() * 1000.0).round() / 1000.0;
    let text = format!("{:.3}", rounded);
    let (int_part, frac_part) = text.split_once('.').unwrap_or((text.as_str(), ""));

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let frac = frac_part.trim_end_matches('0');
    let sign = if value < 0.0 && rounded > 0.0 { "-" } else { "" };
    if frac.is_empty() {
        format!("{}{}", sign, grouped)
    } else {
        format!("{}{}.{}", sign, grouped, frac)
    }
}

/// `2021-01-05` as `Jan 5, 2021`. Unparseable input is returned as is.
pub fn format_date(date: &str) -> String {
    match parse_date(date) {
        Some(parsed) => parsed.format("%b %-d, %Y").to_string(),
        None => date.to_string(),
    }
}
