//! Credential discovery for the cloud backends.
//!
//! AWS keys come from the standard environment variables, falling back to
//! the shared credentials file. The Anthropic key is environment-only.

use std::path::{Path, PathBuf};

use directories::BaseDirs;
use tracing::debug;

use crate::clients::bedrock::sigv4::AwsCredentials;
use crate::clients::ClientError;

pub const ANTHROPIC_API_KEY_VAR: &str = "ANTHROPIC_API_KEY";

const DEFAULT_PROFILE: &str = "default";

pub fn aws_credentials() -> Result<AwsCredentials, ClientError> {
    resolve_aws_credentials(|name| std::env::var(name).ok(), shared_credentials_path())
}

pub fn anthropic_api_key() -> Result<String, ClientError> {
    std::env::var(ANTHROPIC_API_KEY_VAR)
        .ok()
        .map(|key| key.trim().to_string())
        .filter(|key| !key.is_empty())
        .ok_or_else(|| {
            ClientError::Credentials(format!(
                "set {ANTHROPIC_API_KEY_VAR} to use the anthropic platform"
            ))
        })
}

fn shared_credentials_path() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os("AWS_SHARED_CREDENTIALS_FILE") {
        return Some(PathBuf::from(path));
    }
    BaseDirs::new().map(|dirs| dirs.home_dir().join(".aws").join("credentials"))
}

fn resolve_aws_credentials<F>(
    env: F,
    credentials_file: Option<PathBuf>,
) -> Result<AwsCredentials, ClientError>
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |name: &str| env(name).filter(|value| !value.trim().is_empty());

    if let (Some(access_key_id), Some(secret_access_key)) = (
        non_empty("AWS_ACCESS_KEY_ID"),
        non_empty("AWS_SECRET_ACCESS_KEY"),
    ) {
        debug!("Using AWS credentials from the environment");
        return Ok(AwsCredentials {
            access_key_id,
            secret_access_key,
            session_token: non_empty("AWS_SESSION_TOKEN"),
        });
    }

    let profile = non_empty("AWS_PROFILE").unwrap_or_else(|| DEFAULT_PROFILE.to_string());
    if let Some(path) = credentials_file {
        if let Some(creds) = read_profile(&path, &profile) {
            debug!(path = %path.display(), %profile, "Using AWS credentials from shared file");
            return Ok(creds);
        }
    }

    Err(ClientError::Credentials(format!(
        "no AWS credentials found; set AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY \
         or add a [{profile}] profile to ~/.aws/credentials"
    )))
}

fn read_profile(path: &Path, profile: &str) -> Option<AwsCredentials> {
    let contents = std::fs::read_to_string(path).ok()?;
    parse_profile(&contents, profile)
}

/// Extract one profile from an INI-style shared credentials file.
fn parse_profile(contents: &str, profile: &str) -> Option<AwsCredentials> {
    let mut in_profile = false;
    let mut access_key_id = None;
    let mut secret_access_key = None;
    let mut session_token = None;

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(section) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            in_profile = section.trim() == profile;
            continue;
        }
        if !in_profile {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim().to_string();
        match key.trim().to_ascii_lowercase().as_str() {
            "aws_access_key_id" => access_key_id = Some(value),
            "aws_secret_access_key" => secret_access_key = Some(value),
            "aws_session_token" => session_token = Some(value),
            _ => {}
        }
    }

    Some(AwsCredentials {
        access_key_id: access_key_id?,
        secret_access_key: secret_access_key?,
        session_token,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    const SAMPLE: &str = "\
# comment
[work]
aws_access_key_id = WORKKEY
aws_secret_access_key = worksecret

[default]
aws_access_key_id=DEFAULTKEY
aws_secret_access_key=defaultsecret
aws_session_token = tok
";

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn parses_requested_profile_only() {
        let default = parse_profile(SAMPLE, "default").unwrap();
        assert_eq!(default.access_key_id, "DEFAULTKEY");
        assert_eq!(default.session_token.as_deref(), Some("tok"));

        let work = parse_profile(SAMPLE, "work").unwrap();
        assert_eq!(work.secret_access_key, "worksecret");
        assert!(work.session_token.is_none());

        assert!(parse_profile(SAMPLE, "missing").is_none());
    }

    #[test]
    fn environment_wins_over_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("credentials");
        std::fs::write(&path, SAMPLE).unwrap();

        let env = env_from(&[
            ("AWS_ACCESS_KEY_ID", "ENVKEY"),
            ("AWS_SECRET_ACCESS_KEY", "envsecret"),
        ]);
        let creds = resolve_aws_credentials(env, Some(path)).unwrap();
        assert_eq!(creds.access_key_id, "ENVKEY");
        assert!(creds.session_token.is_none());
    }

    #[test]
    fn falls_back_to_profile_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("credentials");
        std::fs::write(&path, SAMPLE).unwrap();

        let creds = resolve_aws_credentials(env_from(&[]), Some(path.clone())).unwrap();
        assert_eq!(creds.access_key_id, "DEFAULTKEY");

        let creds =
            resolve_aws_credentials(env_from(&[("AWS_PROFILE", "work")]), Some(path)).unwrap();
        assert_eq!(creds.access_key_id, "WORKKEY");
    }

    #[test]
    fn missing_everywhere_is_a_credentials_error() {
        let dir = TempDir::new().unwrap();
        let err = resolve_aws_credentials(
            env_from(&[("AWS_ACCESS_KEY_ID", "only-half")]),
            Some(dir.path().join("absent")),
        )
        .unwrap_err();
        assert!(matches!(err, ClientError::Credentials(_)));
    }
}
