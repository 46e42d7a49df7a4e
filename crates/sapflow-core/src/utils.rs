//! Small formatting and validation helpers

use crate::error::{FlowError, Result};
use chrono::{Datelike, Duration, NaiveDate};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid email regex"));

static PLACEHOLDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{|\}\}|\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid placeholder regex"));

const IMAGE_EXTENSIONS: [&str; 7] = ["png", "jpg", "jpeg", "gif", "bmp", "tiff", "webp"];

const MONTHS_PT: [&str; 12] = [
    "Janeiro", "Fevereiro", "Março", "Abril", "Maio", "Junho",
    "Julho", "Agosto", "Setembro", "Outubro", "Novembro", "Dezembro",
];

/// Substitute `{name}` placeholders with values from `variables`.
///
/// `{{` and `}}` produce literal braces. An unknown name is an error.
pub fn generate_template(template: &str, variables: &BTreeMap<String, String>) -> Result<String> {
    let mut missing: Option<String> = None;

    let rendered = PLACEHOLDER_RE.replace_all(template, |caps: &Captures| {
        match (caps.get(0).map(|m| m.as_str()), caps.get(1)) {
            (Some("{{"), _) => "{".to_string(),
            (Some("}}"), _) => "}".to_string(),
            (_, Some(name)) => match variables.get(name.as_str()) {
                Some(value) => value.clone(),
                None => {
                    missing.get_or_insert_with(|| name.as_str().to_string());
                    String::new()
                }
            },
            _ => String::new(),
        }
    });

    match missing {
        Some(name) => Err(FlowError::Validation(format!("Template variable '{}' is not defined", name))),
        None => Ok(rendered.into_owned()),
    }
}

/// Convert `dd/mm/yyyy` into `dd de <Mês>`
pub fn convert_date(date_str: &str) -> Result<String> {
    let date = NaiveDate::parse_from_str(date_str.trim(), "%d/%m/%Y")
        .map_err(|e| FlowError::Validation(format!("Invalid date '{}': {}", date_str, e)))?;

    Ok(format!("{:02} de {}", date.day(), MONTHS_PT[date.month0() as usize]))
}

/// First day of the previous month and `today`, both as `dd.mm.yyyy`
pub fn previous_month_range(today: NaiveDate) -> (String, String) {
    let first_of_month = today.with_day(1).unwrap_or(today);
    let last_of_previous = first_of_month - Duration::days(1);
    let start = last_of_previous.with_day(1).unwrap_or(last_of_previous);

    (start.format("%d.%m.%Y").to_string(), today.format("%d.%m.%Y").to_string())
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

/// Whether the path has a common image extension
pub fn is_image_file<P: AsRef<Path>>(path: P) -> bool {
    path.as_ref()
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Render a JSON object as the HTML error-report table.
///
/// Values are inserted verbatim, without HTML escaping.
pub fn json_to_html(data: Option<&Map<String, Value>>) -> String {
    let Some(data) = data else {
        return "<html><body><h1>Error Report</h1><p>No data available to display.</p></body></html>"
            .to_string();
    };

    let mut html = String::from("<html><body><h1>Error Report</h1><table border='1'>");
    for (key, value) in data {
        let rendered = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        html.push_str(&format!("<tr><th>{}</th><td>{}</td></tr>", key, rendered));
    }
    html.push_str("</table></body></html>");
    html
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn email_validation() {
        assert!(is_valid_email("user@domain.tld"));
        assert!(is_valid_email("first.last@mail.example.pt"));
        assert!(!is_valid_email("userdomain.tld"));
        assert!(!is_valid_email("user@domain"));
        assert!(!is_valid_email("user@"));
        assert!(!is_valid_email(""));
    }

    #[test]
    fn convert_date_to_portuguese() {
        assert_eq!(convert_date("01/02/2024").unwrap(), "01 de Fevereiro");

        for (month, name) in MONTHS_PT.iter().enumerate() {
            let input = format!("15/{:02}/2023", month + 1);
            assert_eq!(convert_date(&input).unwrap(), format!("15 de {}", name));
        }

        assert!(convert_date("2024-02-01").is_err());
    }

    #[test]
    fn json_to_html_without_data() {
        assert_eq!(
            json_to_html(None),
            "<html><body><h1>Error Report</h1><p>No data available to display.</p></body></html>"
        );
    }

    #[test]
    fn json_to_html_keeps_order_and_does_not_escape() {
        let data = json!({
            "zeta": "<b>bold</b> & more",
            "alpha": 42,
            "status": "pending"
        });
        let html = json_to_html(data.as_object());

        assert!(html.contains("<tr><th>zeta</th><td><b>bold</b> & more</td></tr>"));
        assert!(html.contains("<tr><th>alpha</th><td>42</td></tr>"));
        let zeta = html.find("zeta").unwrap();
        let alpha = html.find("alpha").unwrap();
        let status = html.find("status").unwrap();
        assert!(zeta < alpha && alpha < status);
        assert_eq!(html.matches("<tr>").count(), 3);
    }

    #[test]
    fn template_substitution() {
        let mut vars = BTreeMap::new();
        vars.insert("order".to_string(), "5100234350".to_string());

        assert_eq!(generate_template("VBELN={order}", &vars).unwrap(), "VBELN=5100234350");
        assert_eq!(generate_template("{{literal}} {order}", &vars).unwrap(), "{literal} 5100234350");
        assert!(generate_template("{unknown}", &vars).is_err());
    }

    #[test]
    fn image_detection() {
        assert!(is_image_file("logo.PNG"));
        assert!(is_image_file("/tmp/a/photo.jpeg"));
        assert!(!is_image_file("report.pdf"));
        assert!(!is_image_file("noextension"));
    }

    #[test]
    fn previous_month_range_crosses_year() {
        let today = NaiveDate::from_ymd_opt(2024, 1, 17).unwrap();
        assert_eq!(
            previous_month_range(today),
            ("01.12.2023".to_string(), "17.01.2024".to_string())
        );
    }
}
