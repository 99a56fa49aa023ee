use std::collections::HashMap;

use url::Url;

use crate::apps::error::{DescriptorError, InstallError};

pub const APP_CONF: &str = "app.conf";
pub const DEFAULT_VERSION: &str = "N/A";

const INSTALLER_SINGULAR_KEYS: [&str; 3] = ["folder-name", "conf-url", "script-url"];
const OPTIONAL_URL_KEY: &str = "optional-url";

/// One `key: value` line, key lower-cased, both sides trimmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorLine {
    pub line: usize,
    pub key: String,
    pub value: String,
}

/// Ordered descriptor lines plus the warnings raised while reading them.
#[derive(Debug, Default)]
pub struct DescriptorLines {
    pub entries: Vec<DescriptorLine>,
    pub warnings: Vec<String>,
}

/// Split descriptor text into `key: value` lines.
///
/// Blank lines and `#` comments (whole-line or trailing) are ignored. A line
/// without `:` is skipped with a warning. Input that has content but not a
/// single usable line is an error.
pub fn parse_lines(text: &str) -> Result<DescriptorLines, DescriptorError> {
    let mut parsed = DescriptorLines::default();
    let mut malformed = 0;

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.split_once('#').map_or(raw, |(before, _)| before).trim();
        if line.is_empty() {
            continue;
        }

        match line.split_once(':') {
            Some((key, value)) if !key.trim().is_empty() => {
                parsed.entries.push(DescriptorLine {
                    line: line_no,
                    key: key.trim().to_lowercase(),
                    value: value.trim().to_string(),
                });
            }
            _ => {
                malformed += 1;
                parsed.warnings.push(format!(
                    "line {line_no}: malformed (missing key or ':'), ignored: '{line}'"
                ));
            }
        }
    }

    if parsed.entries.is_empty() && malformed > 0 {
        return Err(DescriptorError { malformed });
    }

    Ok(parsed)
}

/// Case-insensitive `key -> value` mapping; later duplicates win.
#[derive(Debug, Default)]
pub struct Descriptor {
    values: HashMap<String, String>,
    pub warnings: Vec<String>,
}

impl Descriptor {
    pub fn parse(text: &str) -> Result<Self, DescriptorError> {
        let DescriptorLines { entries, warnings } = parse_lines(text)?;
        let mut descriptor = Self {
            values: HashMap::new(),
            warnings,
        };

        for entry in entries {
            if descriptor.values.contains_key(&entry.key) {
                descriptor.warnings.push(format!(
                    "line {}: duplicate key '{}', using last value",
                    entry.line, entry.key
                ));
            }
            descriptor.values.insert(entry.key, entry.value);
        }

        Ok(descriptor)
    }

    /// Non-empty value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(&key.to_lowercase())
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }
}

/// A value parsed from remote or on-disk text together with its non-fatal warnings.
#[derive(Debug)]
pub struct Parsed<T> {
    pub value: T,
    pub warnings: Vec<String>,
}

/// Stage-one descriptor: where to put the app and where its pieces live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallerDescriptor {
    pub folder_name: String,
    pub conf_url: String,
    pub script_url: String,
    pub optional_urls: Vec<String>,
}

impl InstallerDescriptor {
    pub fn parse(text: &str, origin: &str) -> Result<Parsed<Self>, InstallError> {
        let DescriptorLines {
            entries,
            mut warnings,
        } = parse_lines(text).map_err(|err| invalid(origin, err.to_string()))?;

        let mut singular: HashMap<&'static str, String> = HashMap::new();
        let mut optional_urls = Vec::new();

        for entry in entries {
            if entry.value.is_empty() {
                warnings.push(format!(
                    "line {}: empty value for key '{}', skipped",
                    entry.line, entry.key
                ));
                continue;
            }

            if entry.key == OPTIONAL_URL_KEY {
                optional_urls.push(entry.value);
                continue;
            }

            let Some(key) = INSTALLER_SINGULAR_KEYS
                .iter()
                .copied()
                .find(|known| *known == entry.key)
            else {
                warnings.push(format!(
                    "line {}: unknown key '{}', ignored",
                    entry.line, entry.key
                ));
                continue;
            };

            if singular.insert(key, entry.value).is_some() {
                warnings.push(format!(
                    "line {}: duplicate key '{key}', using last value",
                    entry.line
                ));
            }
        }

        let missing: Vec<&str> = INSTALLER_SINGULAR_KEYS
            .iter()
            .copied()
            .filter(|key| !singular.contains_key(key))
            .collect();
        if !missing.is_empty() {
            return Err(invalid(origin, format!("missing {}", missing.join(", "))));
        }

        let mut take = |key: &str| singular.remove(key).unwrap_or_default();
        let value = Self {
            folder_name: take("folder-name"),
            conf_url: take("conf-url"),
            script_url: take("script-url"),
            optional_urls,
        };

        Ok(Parsed { value, warnings })
    }
}

/// The `app.conf` of an installed application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationDescriptor {
    pub name: String,
    pub command: String,
    pub version: String,
    pub file: String,
}

impl ApplicationDescriptor {
    pub fn parse(text: &str, origin: &str) -> Result<Parsed<Self>, InstallError> {
        let descriptor = Descriptor::parse(text).map_err(|err| invalid(origin, err.to_string()))?;

        let name = descriptor.get("name");
        let file = descriptor.get("file");
        let (Some(name), Some(file)) = (name, file) else {
            let missing: Vec<&str> = [("name", name), ("file", file)]
                .into_iter()
                .filter(|(_, value)| value.is_none())
                .map(|(key, _)| key)
                .collect();
            return Err(invalid(origin, format!("missing {}", missing.join(", "))));
        };

        let value = Self {
            name: name.to_string(),
            command: descriptor.get("command").unwrap_or(name).to_string(),
            version: descriptor
                .get("version")
                .unwrap_or(DEFAULT_VERSION)
                .to_string(),
            file: file.to_string(),
        };

        Ok(Parsed {
            value,
            warnings: descriptor.warnings,
        })
    }
}

/// A file name that stays inside the directory it is joined to.
pub fn is_safe_file_name(name: &str) -> bool {
    !name.is_empty()
        && !name.contains("..")
        && !name.contains('/')
        && !name.contains('\\')
        && !name.starts_with('.')
}

/// Last path segment of an URL; `None` when the path ends in `/`.
pub fn url_file_name(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let name = parsed.path_segments()?.last()?;
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// `http`/`https` URL with a host.
pub fn is_web_url(candidate: &str) -> bool {
    Url::parse(candidate)
        .map(|url| {
            matches!(url.scheme(), "http" | "https")
                && url.host_str().is_some_and(|host| !host.is_empty())
        })
        .unwrap_or(false)
}

fn invalid(origin: &str, reason: String) -> InstallError {
    InstallError::InvalidDescriptor {
        origin: origin.to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_keys_case_insensitively_and_strips_comments() {
        let text = "# header\n\n  Name : Weather # trailing\nFILE: weather.py\n";
        let descriptor = Descriptor::parse(text).unwrap();

        assert_eq!(descriptor.get("name"), Some("Weather"));
        assert_eq!(descriptor.get("NAME"), Some("Weather"));
        assert_eq!(descriptor.get("file"), Some("weather.py"));
        assert!(descriptor.warnings.is_empty());
    }

    #[test]
    fn malformed_lines_are_skipped_without_aborting() {
        let text = "name: Weather\nthis line has no separator\nfile: weather.py\n";
        let descriptor = Descriptor::parse(text).unwrap();

        assert_eq!(descriptor.get("file"), Some("weather.py"));
        assert_eq!(descriptor.warnings.len(), 1);
        assert!(descriptor.warnings[0].starts_with("line 2"));
    }

    #[test]
    fn duplicate_keys_keep_last_value_with_warning() {
        let descriptor = Descriptor::parse("version: 1\nversion: 2\n").unwrap();

        assert_eq!(descriptor.get("version"), Some("2"));
        assert!(descriptor.warnings[0].contains("duplicate key 'version'"));
    }

    #[test]
    fn values_may_contain_colons() {
        let descriptor = Descriptor::parse("conf-url: https://x/app.conf").unwrap();
        assert_eq!(descriptor.get("conf-url"), Some("https://x/app.conf"));
    }

    #[test]
    fn text_without_any_key_value_line_is_rejected() {
        let err = Descriptor::parse("<html>\n<body>not found</body>\n").unwrap_err();
        assert_eq!(err.malformed, 2);
    }

    #[test]
    fn comment_only_text_parses_empty() {
        let descriptor = Descriptor::parse("# nothing here\n\n").unwrap();
        assert_eq!(descriptor.get("name"), None);
    }

    #[test]
    fn installer_descriptor_collects_optional_urls_in_order() {
        let text = "folder-name: weather\n\
                    conf-url: https://x/app.conf\n\
                    script-url: https://x/weather.py\n\
                    optional-url: https://x/b.txt\n\
                    optional-url: https://x/a.txt\n\
                    colour: blue\n\
                    optional-url:\n";
        let parsed = InstallerDescriptor::parse(text, "test").unwrap();

        assert_eq!(parsed.value.folder_name, "weather");
        assert_eq!(
            parsed.value.optional_urls,
            vec!["https://x/b.txt".to_string(), "https://x/a.txt".to_string()]
        );
        assert!(parsed.warnings.iter().any(|w| w.contains("unknown key 'colour'")));
        assert!(parsed.warnings.iter().any(|w| w.contains("empty value")));
    }

    #[test]
    fn installer_descriptor_requires_all_singular_keys() {
        let err = InstallerDescriptor::parse("folder-name: weather\n", "remote").unwrap_err();
        match err {
            InstallError::InvalidDescriptor { origin, reason } => {
                assert_eq!(origin, "remote");
                assert!(reason.contains("conf-url"));
                assert!(reason.contains("script-url"));
                assert!(!reason.contains("folder-name"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn installer_descriptor_last_singular_value_wins() {
        let text = "folder-name: a\n\
                    folder-name: b\n\
                    conf-url: https://x/c\n\
                    script-url: https://x/s.py\n";
        let parsed = InstallerDescriptor::parse(text, "test").unwrap();

        assert_eq!(parsed.value.folder_name, "b");
        assert_eq!(parsed.warnings.len(), 1);
    }

    #[test]
    fn application_descriptor_applies_defaults() {
        let parsed =
            ApplicationDescriptor::parse("name: Weather\nfile: weather.py\n", "test").unwrap();

        assert_eq!(parsed.value.command, "Weather");
        assert_eq!(parsed.value.version, DEFAULT_VERSION);
    }

    #[test]
    fn application_descriptor_requires_name_and_file() {
        let err = ApplicationDescriptor::parse("command: weather\n", "test").unwrap_err();
        assert!(err.to_string().contains("missing name, file"));
    }

    #[test]
    fn safe_file_names_reject_escapes() {
        assert!(is_safe_file_name("weather.py"));
        assert!(!is_safe_file_name(""));
        assert!(!is_safe_file_name("../weather.py"));
        assert!(!is_safe_file_name("nested/weather.py"));
        assert!(!is_safe_file_name("nested\\weather.py"));
        assert!(!is_safe_file_name(".hidden"));
    }

    #[test]
    fn url_file_name_uses_last_path_segment() {
        assert_eq!(
            url_file_name("https://x/files/weather.py?raw=1"),
            Some("weather.py".to_string())
        );
        assert_eq!(url_file_name("https://x/"), None);
        assert_eq!(url_file_name("https://x/assets/"), None);
        assert_eq!(url_file_name("not a url"), None);
    }

    #[test]
    fn web_urls_need_scheme_and_host() {
        assert!(is_web_url("https://example.com/repo.txt"));
        assert!(is_web_url("http://example.com"));
        assert!(!is_web_url("ftp://example.com/repo.txt"));
        assert!(!is_web_url("file:///etc/passwd"));
        assert!(!is_web_url("weather"));
    }
}
