//! Active Directory user lookup through PowerShell `Get-ADUser`

use crate::error::{FlowError, Result};
use encoding_rs::WINDOWS_1252;
use std::collections::BTreeMap;
use tokio::process::Command;

/// How to find the user
#[derive(Debug, Clone, PartialEq)]
pub enum DirectoryQuery {
    Identity(String),
    Email(String),
}

impl DirectoryQuery {
    fn command(&self) -> String {
        match self {
            DirectoryQuery::Identity(identity) => {
                format!("Get-ADUser -Identity {} -Properties *", identity)
            }
            DirectoryQuery::Email(email) => format!(
                "Get-ADUser -Filter {{EmailAddress -eq '{}'}} -Properties *",
                email.replace('\'', "''")
            ),
        }
    }
}

/// Retrieve every property of a directory user as `name -> value`
pub async fn get_ad_user(query: &DirectoryQuery) -> Result<BTreeMap<String, String>> {
    let output = Command::new("powershell")
        .arg("-NoProfile")
        .arg("-Command")
        .arg(query.command())
        .output()
        .await?;

    if !output.status.success() {
        return Err(FlowError::ServiceUnavailable(format!(
            "Get-ADUser failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let properties = parse_properties(&decode_output(&output.stdout));
    if properties.is_empty() {
        return Err(FlowError::NoData(format!("No directory entry for {:?}", query)));
    }
    Ok(properties)
}

/// Decode PowerShell output: UTF-8 when valid, Windows-1252 otherwise
pub fn decode_output(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => {
            let (text, _, _) = WINDOWS_1252.decode(bytes);
            text.into_owned()
        }
    }
}

/// Parse `Name : Value` lines; lines without a colon are ignored
pub fn parse_properties(output: &str) -> BTreeMap<String, String> {
    output
        .lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .filter(|(key, _)| !key.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_property_listing() {
        let output = "\r\nDisplayName    : Ana Sousa\r\nEmailAddress   : ana@example.pt\r\n\
                      whenCreated    : 01/02/2020 10:11:12\r\ngarbage line\r\n";
        let props = parse_properties(output);

        assert_eq!(props.get("DisplayName").map(String::as_str), Some("Ana Sousa"));
        assert_eq!(props.get("EmailAddress").map(String::as_str), Some("ana@example.pt"));
        assert_eq!(props.get("whenCreated").map(String::as_str), Some("01/02/2020 10:11:12"));
        assert_eq!(props.len(), 3);
    }

    #[test]
    fn decodes_windows_1252_fallback() {
        // "João" in Windows-1252
        assert_eq!(decode_output(&[0x4a, 0x6f, 0xe3, 0x6f]), "João");
        assert_eq!(decode_output("Olá".as_bytes()), "Olá");
    }

    #[test]
    fn decodes_windows_1252_punctuation_range() {
        // 0x80 is the euro sign and 0x93/0x94 are curly quotes in Windows-1252
        assert_eq!(decode_output(&[0x80, 0x20, 0x93, 0x6f, 0x94]), "\u{20ac} \u{201c}o\u{201d}");
    }

    #[test]
    fn email_query_escapes_quotes() {
        let query = DirectoryQuery::Email("o'neil@example.com".to_string());
        assert!(query.command().contains("'o''neil@example.com'"));
    }
}
