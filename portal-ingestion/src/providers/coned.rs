//! Con Edison customer portal with Opower-hosted usage data.
//!
//! Login goes through the portal's sitecore API (credentials, optional
//! one-time code, cookie redirect) and ends with an Opower bearer token used
//! for the metadata, meters and real-time usage endpoints.

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use usage_client::ReadingsBatch;

use super::UtilityProvider;
use crate::{
    credentials::CredentialSupplier,
    error::{AuthError, FetchError, ResolutionError},
    session::{AuthState, Session},
    transform::{normalize_reads, RawRead},
};

const DEFAULT_PORTAL_BASE_URL: &str = "https://www.coned.com/sitecore/api/ssc";
const DEFAULT_OPOWER_BASE_URL: &str = "https://cned.opower.com/ei/edge/apis";
const PORTAL_ORIGIN: &str = "https://www.coned.com";

/// Where the portal would send a browser after login; echoed back on login
/// and on code verification.
const RETURN_URL: &str =
    "%2Fen%2Faccounts-billing%2Fmy-account%2Fenergy-use%3Ftab1%3DsectionRealTimeData-2";

const DEFAULT_LOGIN_ERROR: &str = "your username or password are incorrect";
const DEFAULT_CHALLENGE_PROMPT: &str = "Enter the one-time code";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    // Flags arrive as booleans, `null` or absent; judged by truthiness.
    #[serde(default)]
    login: Option<Value>,
    #[serde(default)]
    login_error_msg: Option<String>,
    #[serde(default)]
    new_device: Option<Value>,
    #[serde(default)]
    no_mfa: Option<Value>,
    #[serde(default)]
    new_device_text: Option<String>,
    #[serde(default)]
    auth_redirect_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyFactorResponse {
    #[serde(default)]
    code: Option<Value>,
    #[serde(default)]
    auth_redirect_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct UsagePayload {
    #[serde(default)]
    reads: Vec<RawRead>,
}

fn flag(value: &Option<Value>) -> bool {
    value.as_ref().is_some_and(is_truthy)
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Reduces the portal's "new device" text to the part after the last colon.
fn challenge_prompt(new_device_text: Option<&str>) -> String {
    let prompt = new_device_text
        .and_then(|text| text.rsplit(':').next())
        .map(|tail| tail.replace('"', "").trim().to_string())
        .unwrap_or_default();

    if prompt.is_empty() {
        DEFAULT_CHALLENGE_PROMPT.to_string()
    } else {
        prompt
    }
}

/// The token endpoint answers with a JSON string literal.
fn normalize_token(raw: &str) -> String {
    raw.trim().trim_matches('"').to_string()
}

fn id_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct ConEdProvider {
    portal_base_url: String,
    opower_base_url: String,
}

impl Default for ConEdProvider {
    fn default() -> Self {
        Self {
            portal_base_url: DEFAULT_PORTAL_BASE_URL.to_string(),
            opower_base_url: DEFAULT_OPOWER_BASE_URL.to_string(),
        }
    }
}

impl ConEdProvider {
    pub fn with_portal_base_url(mut self, url: &str) -> Self {
        self.portal_base_url = url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_opower_base_url(mut self, url: &str) -> Self {
        self.opower_base_url = url.trim_end_matches('/').to_string();
        self
    }

    pub fn login_url(&self) -> String {
        format!(
            "{}/ConEdWeb-Foundation-Login-Areas-LoginAPI/User/0/Login",
            self.portal_base_url
        )
    }

    pub fn verify_factor_url(&self) -> String {
        format!(
            "{}/ConEdWeb-Foundation-Login-Areas-LoginAPI/User/0/VerifyFactor",
            self.portal_base_url
        )
    }

    pub fn token_url(&self) -> String {
        format!(
            "{}/ConEd-Cms-Services-Controllers-Opower/OpowerService/0/GetOPowerToken",
            self.portal_base_url
        )
    }

    pub fn metadata_url(&self) -> String {
        format!("{}/DataBrowser-v1/cws/metadata", self.opower_base_url)
    }

    pub fn meters_url(&self, account_id: &str) -> String {
        format!(
            "{}/cws-real-time-ami-v1/cws/cned/accounts/{account_id}/meters",
            self.opower_base_url
        )
    }

    pub fn usage_url(&self, account_id: &str, meter_id: &str) -> String {
        format!(
            "{}/cws-real-time-ami-v1/cws/cned/accounts/{account_id}/meters/{meter_id}/usage",
            self.opower_base_url
        )
    }

    async fn login_flow(
        &self,
        session: &mut Session,
        supplier: &dyn CredentialSupplier,
    ) -> Result<(), AuthError> {
        let credentials = supplier.credentials();
        info!(username = %credentials.username, "logging in");

        let body = json!({
            "LoginEmail": credentials.username,
            "LoginPassword": credentials.password,
            "ReturnUrl": RETURN_URL,
        });
        let login: LoginResponse = session.post(&self.login_url(), &body).await?.json()?;

        if !flag(&login.login) {
            let reason = login
                .login_error_msg
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_LOGIN_ERROR.to_string());
            return Err(AuthError::Rejected(reason));
        }
        session.advance(AuthState::CredentialsSubmitted)?;
        metrics::counter!("portal_logins_total").increment(1);

        let mut redirect_url = login.auth_redirect_url;

        if flag(&login.new_device) && !flag(&login.no_mfa) {
            session.advance(AuthState::ChallengeRequired)?;
            metrics::counter!("portal_challenges_total").increment(1);

            let prompt = challenge_prompt(login.new_device_text.as_deref());
            let code = supplier
                .one_time_code(&prompt)
                .ok_or(AuthError::MissingChallengeCode)?;

            info!("verifying one-time code");
            let body = json!({
                "MFACode": code,
                "ReturnUrl": RETURN_URL,
            });
            let verified: VerifyFactorResponse =
                session.post(&self.verify_factor_url(), &body).await?.json()?;

            if !flag(&verified.code) {
                return Err(AuthError::ChallengeFailed);
            }
            session.advance(AuthState::ChallengeVerified)?;
            redirect_url = verified.auth_redirect_url;
        }

        // The redirect returns nothing of interest but sets the session cookies.
        let redirect_url = redirect_url
            .filter(|u| !u.is_empty())
            .ok_or(AuthError::MissingField("authRedirectUrl"))?;
        info!("fetching session cookies");
        session.get(&redirect_url).await?;

        info!("exchanging session for bearer token");
        let response = session.get(&self.token_url()).await?;
        let token = normalize_token(response.text());
        if token.is_empty() {
            return Err(AuthError::MissingField("token"));
        }
        session.acquire_token(token)?;

        info!("login complete");
        Ok(())
    }
}

#[async_trait::async_trait]
impl UtilityProvider for ConEdProvider {
    fn display_name(&self) -> &str {
        "Con Edison"
    }

    fn default_headers(&self) -> Vec<(String, String)> {
        vec![
            ("Accept".to_string(), "*/*".to_string()),
            ("Content-Type".to_string(), "application/json".to_string()),
            ("Origin".to_string(), PORTAL_ORIGIN.to_string()),
            ("Referer".to_string(), format!("{PORTAL_ORIGIN}/")),
        ]
    }

    async fn login(
        &self,
        session: &mut Session,
        supplier: &dyn CredentialSupplier,
    ) -> Result<(), AuthError> {
        match self.login_flow(session, supplier).await {
            Ok(()) => Ok(()),
            Err(e) => Err(session.fail(e)),
        }
    }

    async fn discover_account_id(&self, session: &Session) -> Result<String, ResolutionError> {
        let metadata: Value = session.get(&self.metadata_url()).await?.json()?;

        let accounts = metadata
            .pointer("/fuelTypeServicePoint/ELECTRICITY")
            .and_then(Value::as_array)
            .filter(|a| !a.is_empty())
            .ok_or(ResolutionError::NoAccount)?;

        let account_id = accounts[0]
            .get("accountUuid")
            .and_then(id_to_string)
            .ok_or(ResolutionError::MissingAccountId)?;

        info!(account_id = %account_id, "account id resolved");
        Ok(account_id)
    }

    async fn discover_meter_id(
        &self,
        session: &Session,
        account_id: &str,
    ) -> Result<String, ResolutionError> {
        let meters: Value = session.get(&self.meters_url(account_id)).await?.json()?;

        // Most recent meter is listed last.
        let meter_id = meters
            .get("meters_ids")
            .and_then(Value::as_array)
            .and_then(|ids| ids.last())
            .and_then(id_to_string)
            .ok_or(ResolutionError::NoMeter)?;

        info!(meter_id = %meter_id, "meter id resolved");
        Ok(meter_id)
    }

    async fn fetch_current_window(&self, session: &Session) -> Result<ReadingsBatch, FetchError> {
        session.require_authorized()?;
        let (account_id, meter_id) = session.resolved_ids().ok_or(FetchError::NotResolved)?;

        let payload: UsagePayload = session
            .get(&self.usage_url(account_id, meter_id))
            .await?
            .json()?;
        let received = payload.reads.len();

        let normalized = normalize_reads(payload.reads)?;
        metrics::counter!("readings_fetched_total").increment(normalized.batch.len() as u64);

        info!(
            received,
            kept = normalized.batch.len(),
            discarded = normalized.discarded,
            "usage window fetched"
        );
        Ok(normalized.batch)
    }
}
