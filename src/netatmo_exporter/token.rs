// netatmo_exporter - Prometheus metrics exporter for Netatmo weather stations
//
// Copyright 2022 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use crate::clock::{unix_secs, Clock};
use crate::collector::encode_gauge;
use chrono::{DateTime, Utc};
use prometheus_client::collector::Collector;
use prometheus_client::encoding::DescriptorEncoder;
use serde::{Deserialize, Deserializer, Serialize};
use std::error;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Write};
#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

const TOKEN_VALID: (&str, &str) = (
    "netatmo_exporter_token_valid",
    "Set to 1 if there is a valid token, 0 otherwise.",
);
const TOKEN_EXPIRY: (&str, &str) = (
    "netatmo_exporter_token_expiry_time",
    "Set to the unix timestamp when the token will expire. 0 if no expiry is set.",
);

/// Tokens are treated as expired this long before their actual expiry.
const EXPIRY_DELTA: Duration = Duration::from_secs(10);

/// Expiry assumed for restored tokens that don't have one.
const DEFAULT_EXPIRY: Duration = Duration::from_secs(30 * 60);

/// Unix timestamp of `0001-01-01T00:00:00Z`, written by Go for tokens without an expiry.
const GO_ZERO_TIME_SECS: i64 = -62_135_596_800;

/// OAuth2 token used to authenticate against the Netatmo API.
#[derive(Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct Token {
    pub access_token: String,
    #[serde(default)]
    pub token_type: String,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(
        default,
        deserialize_with = "deserialize_expiry",
        skip_serializing_if = "Option::is_none"
    )]
    pub expiry: Option<DateTime<Utc>>,
}

fn deserialize_expiry<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let expiry = Option::<DateTime<Utc>>::deserialize(deserializer)?;
    Ok(expiry.filter(|t| t.timestamp() != GO_ZERO_TIME_SECS))
}

impl Token {
    /// True if the token has an access token that isn't about to expire.
    pub fn is_valid(&self, now: SystemTime) -> bool {
        if self.access_token.is_empty() {
            return false;
        }

        match self.expiry {
            None => true,
            Some(expiry) => SystemTime::from(expiry)
                .checked_sub(EXPIRY_DELTA)
                .map(|t| t >= now)
                .unwrap_or(false),
        }
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("refresh_token", &"<redacted>")
            .field("expiry", &self.expiry)
            .finish()
    }
}

/// Provides the token currently in use by the Netatmo API client, if any.
pub trait TokenSource: Send + Sync + 'static {
    fn current_token(&self) -> Option<Token>;
}

impl<F> TokenSource for F
where
    F: Fn() -> Option<Token> + Send + Sync + 'static,
{
    fn current_token(&self) -> Option<Token> {
        self()
    }
}

/// Prometheus collector reporting whether the exporter is currently authenticated.
pub struct TokenCollector {
    source: Box<dyn TokenSource>,
    clock: Arc<dyn Clock>,
}

impl TokenCollector {
    pub fn new<S>(source: S, clock: Arc<dyn Clock>) -> Self
    where
        S: TokenSource,
    {
        TokenCollector {
            source: Box::new(source),
            clock,
        }
    }
}

impl fmt::Debug for TokenCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCollector").finish_non_exhaustive()
    }
}

impl Collector for TokenCollector {
    fn encode(&self, mut encoder: DescriptorEncoder) -> Result<(), fmt::Error> {
        let now = self.clock.now();
        let (valid, expiry) = match self.source.current_token() {
            Some(token) if token.is_valid(now) => {
                (1.0, unix_secs(token.expiry.map(SystemTime::from)))
            }
            _ => (0.0, 0.0),
        };

        encode_gauge(&mut encoder, TOKEN_VALID, valid)?;
        encode_gauge(&mut encoder, TOKEN_EXPIRY, expiry)
    }
}

#[derive(Debug)]
pub enum TokenFileError {
    Io(io::Error),
    Json(serde_json::Error),
}

impl fmt::Display for TokenFileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "token file error: {}", e),
            Self::Json(e) => write!(f, "token file format error: {}", e),
        }
    }
}

impl error::Error for TokenFileError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Json(e) => Some(e),
        }
    }
}

/// Load a previously saved token, `None` if the file doesn't exist yet.
///
/// The file uses the same JSON layout as Go's `oauth2.Token`, with the expiry as an
/// RFC 3339 timestamp. Tokens without an expiry are given one 30 minutes after `now`
/// so that they get refreshed soon.
pub fn load_token(path: &Path, now: SystemTime) -> Result<Option<Token>, TokenFileError> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(TokenFileError::Io(e)),
    };

    let mut token: Token = serde_json::from_reader(BufReader::new(file)).map_err(TokenFileError::Json)?;
    if token.refresh_token.is_empty() {
        tracing::warn!(
            message = "restored token has no refresh token, exporter will need to be re-authenticated manually",
            path = %path.display(),
        );
    } else if token.expiry.is_none() {
        tracing::warn!(
            message = "restored token has no expiry time, setting expiry",
            path = %path.display(),
            expiry_secs = DEFAULT_EXPIRY.as_secs(),
        );
        token.expiry = Some(DateTime::from(now + DEFAULT_EXPIRY));
    }

    Ok(Some(token))
}

/// Persist a token so that it can be restored on the next start, readable only by
/// the current user.
pub fn save_token(path: &Path, token: &Token) -> Result<(), TokenFileError> {
    let data = serde_json::to_vec(token).map_err(TokenFileError::Json)?;

    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(path).map_err(TokenFileError::Io)?;
    file.write_all(&data).map_err(TokenFileError::Io)?;
    tracing::debug!(message = "saved token", path = %path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{load_token, save_token, Token, TokenCollector, TokenFileError};
    use crate::clock::ManualClock;
    use chrono::{DateTime, Utc};
    use prometheus_client::encoding::text::encode;
    use prometheus_client::registry::Registry;
    use std::fs;
    use std::sync::Arc;
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    fn at(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn expiry_at(secs: u64) -> Option<DateTime<Utc>> {
        Some(DateTime::from(at(secs)))
    }

    fn token(expiry: Option<DateTime<Utc>>) -> Token {
        Token {
            access_token: "access".to_owned(),
            token_type: "Bearer".to_owned(),
            refresh_token: "refresh".to_owned(),
            expiry,
        }
    }

    fn value(text: &str, series: &str) -> Option<f64> {
        text.lines()
            .find_map(|l| l.strip_prefix(series)?.strip_prefix(' '))
            .and_then(|v| v.trim().parse().ok())
    }

    fn scrape(token: Option<Token>, now: u64) -> String {
        let mut registry = Registry::default();
        registry.register_collector(Box::new(TokenCollector::new(
            move || token.clone(),
            Arc::new(ManualClock::at_secs(now)),
        )));

        let mut buf = String::new();
        encode(&mut buf, &registry).unwrap();
        buf
    }

    #[test]
    fn test_is_valid() {
        assert!(token(None).is_valid(at(1000)));
        assert!(token(expiry_at(1010)).is_valid(at(1000)));
        assert!(!token(expiry_at(1009)).is_valid(at(1000)));

        let empty = Token {
            access_token: String::new(),
            ..token(None)
        };
        assert!(!empty.is_valid(at(1000)));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let out = format!("{:?}", token(None));
        assert!(!out.contains("access\""));
        assert!(!out.contains("refresh\""));
        assert!(out.contains("Bearer"));
    }

    #[test]
    fn test_collector_valid_token() {
        let text = scrape(Some(token(expiry_at(7200))), 3600);
        assert_eq!(Some(1.0), value(&text, "netatmo_exporter_token_valid"));
        assert_eq!(Some(7200.0), value(&text, "netatmo_exporter_token_expiry_time"));
    }

    #[test]
    fn test_collector_valid_token_no_expiry() {
        let text = scrape(Some(token(None)), 3600);
        assert_eq!(Some(1.0), value(&text, "netatmo_exporter_token_valid"));
        assert_eq!(Some(0.0), value(&text, "netatmo_exporter_token_expiry_time"));
    }

    #[test]
    fn test_collector_expired_or_missing_token() {
        let text = scrape(Some(token(expiry_at(3600))), 3600);
        assert_eq!(Some(0.0), value(&text, "netatmo_exporter_token_valid"));
        assert_eq!(Some(0.0), value(&text, "netatmo_exporter_token_expiry_time"));

        let text = scrape(None, 3600);
        assert_eq!(Some(0.0), value(&text, "netatmo_exporter_token_valid"));
        assert_eq!(Some(0.0), value(&text, "netatmo_exporter_token_expiry_time"));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let res = load_token(&dir.path().join("token.json"), at(0)).unwrap();
        assert_eq!(None, res);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        let saved = token(expiry_at(7200));

        save_token(&path, &saved).unwrap();
        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains(r#""expiry":"1970-01-01T02:00:00"#), "unexpected file: {}", raw);

        let loaded = load_token(&path, at(3600)).unwrap();
        assert_eq!(Some(saved), loaded);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(0o600, mode & 0o777);
        }
    }

    #[test]
    fn test_load_sets_missing_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        fs::write(&path, r#"{"access_token":"access","refresh_token":"refresh"}"#).unwrap();

        let loaded = load_token(&path, at(3600)).unwrap().unwrap();
        assert_eq!(expiry_at(3600 + 1800), loaded.expiry);
    }

    #[test]
    fn test_load_go_token_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        fs::write(
            &path,
            r#"{"access_token":"access","token_type":"Bearer","refresh_token":"refresh","expiry":"2023-06-01T12:00:00.123456789+02:00"}"#,
        )
        .unwrap();

        let loaded = load_token(&path, at(1_685_610_000)).unwrap().unwrap();
        let expected: DateTime<Utc> = "2023-06-01T10:00:00.123456789Z".parse().unwrap();
        assert_eq!(Some(expected), loaded.expiry);
        assert_eq!("Bearer", loaded.token_type);
        assert!(loaded.is_valid(at(1_685_610_000)));
        assert!(!loaded.is_valid(at(1_685_613_600)));
    }

    #[test]
    fn test_load_go_zero_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        fs::write(
            &path,
            r#"{"access_token":"access","token_type":"Bearer","refresh_token":"refresh","expiry":"0001-01-01T00:00:00Z"}"#,
        )
        .unwrap();

        let loaded = load_token(&path, at(3600)).unwrap().unwrap();
        assert_eq!(expiry_at(3600 + 1800), loaded.expiry);

        fs::write(&path, r#"{"access_token":"access","expiry":"0001-01-01T00:00:00Z"}"#).unwrap();
        let loaded = load_token(&path, at(3600)).unwrap().unwrap();
        assert_eq!(None, loaded.expiry);
        assert!(loaded.is_valid(at(3600)));
    }

    #[test]
    fn test_load_without_refresh_token_keeps_expiry_unset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        fs::write(&path, r#"{"access_token":"access"}"#).unwrap();

        let loaded = load_token(&path, at(3600)).unwrap().unwrap();
        assert_eq!(None, loaded.expiry);
        assert!(loaded.refresh_token.is_empty());
    }

    #[test]
    fn test_load_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        fs::write(&path, "not json").unwrap();

        match load_token(&path, at(0)) {
            Err(TokenFileError::Json(_)) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
