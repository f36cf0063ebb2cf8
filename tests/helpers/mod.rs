//! In-process stand-ins for Vault and the job service.
//!
//! `MockBroker` enforces token use limits, revocation and single-use
//! response wrapping the way Vault does, so tests can check what a job
//! service would be able to redeem after a dispatch.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::Engine;
use serde_json::{json, Value};

use gostint_client::{
    models::{
        job::JobDescriptor,
        status::{JobState, JobStatus},
        submission::{JobSubmission, SubmitResponse},
        token::{VaultToken, WrappedToken},
    },
    services::{
        jobs::{JobApi, JobServiceError},
        vault::{SecretBroker, TokenInfo, TokenRequest, VaultError},
    },
};

pub const ROLE_ID: &str = "test-role-id";
pub const SECRET_ID: &str = "test-secret-id";
pub const PRIMARY_TOKEN: &str = "s.primary";

#[derive(Debug, Clone)]
struct TokenEntry {
    policies: Vec<String>,
    uses_left: Option<u32>,
    revoked: bool,
}

#[derive(Debug, Default)]
struct BrokerState {
    tokens: HashMap<String, TokenEntry>,
    wrapped: HashMap<String, Value>,
    cubbyholes: HashMap<(String, String), Value>,
    calls: Vec<String>,
    fail_on: HashSet<&'static str>,
    fail_nth: HashMap<&'static str, usize>,
    wrap_ttls: Vec<String>,
    token_requests: Vec<TokenRequest>,
    issued: u32,
}

impl BrokerState {
    fn mint(&mut self, prefix: &str) -> String {
        self.issued += 1;
        format!("s.{}-{}", prefix, self.issued)
    }

    /// Charge one use against `token`, exhausting it at zero.
    fn use_token(&mut self, token: &str, endpoint: &str) -> Result<(), VaultError> {
        let entry = match self.tokens.get_mut(token) {
            Some(entry) if !entry.revoked => entry,
            _ => return Err(denied(endpoint)),
        };
        if let Some(uses) = entry.uses_left.as_mut() {
            *uses -= 1;
            if *uses == 0 {
                entry.revoked = true;
            }
        }
        Ok(())
    }

    fn check(&mut self, op: &'static str) -> Result<(), VaultError> {
        self.calls.push(op.to_string());
        let nth = self.calls.iter().filter(|c| c.as_str() == op).count();
        if self.fail_on.contains(op) || self.fail_nth.get(op) == Some(&nth) {
            return Err(denied(op));
        }
        Ok(())
    }
}

fn denied(endpoint: &str) -> VaultError {
    VaultError::Api {
        endpoint: endpoint.to_string(),
        status: 403,
        errors: vec!["permission denied".to_string()],
    }
}

/// A Vault double with real token semantics.
#[derive(Default)]
pub struct MockBroker {
    state: Mutex<BrokerState>,
}

impl MockBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A broker that already knows `token` as a live, unlimited token.
    pub fn with_token(token: &str) -> Arc<Self> {
        let broker = Self::default();
        broker.state.lock().unwrap().tokens.insert(
            token.to_string(),
            TokenEntry {
                policies: vec!["root".to_string()],
                uses_left: None,
                revoked: false,
            },
        );
        Arc::new(broker)
    }

    /// Make every call to `op` fail with a 403.
    pub fn fail_on(&self, op: &'static str) {
        self.state.lock().unwrap().fail_on.insert(op);
    }

    /// Make only the `nth` (1-based) call to `op` fail with a 403.
    pub fn fail_nth(&self, op: &'static str, nth: usize) {
        self.state.lock().unwrap().fail_nth.insert(op, nth);
    }

    /// Every `auth/token/create` body received, in order.
    pub fn token_requests(&self) -> Vec<TokenRequest> {
        self.state.lock().unwrap().token_requests.clone()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count(&self, op: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.as_str() == op)
            .count()
    }

    pub fn is_revoked(&self, token: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .tokens
            .get(token)
            .map(|t| t.revoked)
            .unwrap_or(false)
    }

    pub fn policies(&self, token: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .tokens
            .get(token)
            .map(|t| t.policies.clone())
            .unwrap_or_default()
    }

    pub fn wrap_ttls(&self) -> Vec<String> {
        self.state.lock().unwrap().wrap_ttls.clone()
    }
}

#[async_trait]
impl SecretBroker for MockBroker {
    async fn login_approle(
        &self,
        role_id: &str,
        secret_id: &str,
    ) -> Result<VaultToken, VaultError> {
        let mut state = self.state.lock().unwrap();
        state.check("login_approle")?;
        if role_id != ROLE_ID || secret_id != SECRET_ID {
            return Err(VaultError::Api {
                endpoint: "auth/approle/login".to_string(),
                status: 400,
                errors: vec!["invalid secret id".to_string()],
            });
        }
        state.tokens.insert(
            PRIMARY_TOKEN.to_string(),
            TokenEntry {
                policies: vec!["default".to_string(), "gostint-client".to_string()],
                uses_left: None,
                revoked: false,
            },
        );
        Ok(VaultToken::new(PRIMARY_TOKEN))
    }

    async fn lookup_self(&self, token: &VaultToken) -> Result<TokenInfo, VaultError> {
        let mut state = self.state.lock().unwrap();
        state.check("lookup_self")?;
        state.use_token(token.expose(), "auth/token/lookup-self")?;
        let policies = state.tokens[token.expose()].policies.clone();
        Ok(TokenInfo {
            display_name: "approle".to_string(),
            policies,
            ttl: 3600,
            num_uses: 0,
        })
    }

    async fn create_token(
        &self,
        token: &VaultToken,
        request: &TokenRequest,
    ) -> Result<VaultToken, VaultError> {
        let mut state = self.state.lock().unwrap();
        state.token_requests.push(request.clone());
        state.check("create_token")?;
        state.use_token(token.expose(), "auth/token/create")?;
        let child = state.mint("token");
        state.tokens.insert(
            child.clone(),
            TokenEntry {
                policies: request.policies.clone(),
                uses_left: request.num_uses,
                revoked: false,
            },
        );
        Ok(VaultToken::new(child))
    }

    async fn revoke_self(&self, token: &VaultToken) -> Result<(), VaultError> {
        let mut state = self.state.lock().unwrap();
        state.check("revoke_self")?;
        state.use_token(token.expose(), "auth/token/revoke-self")?;
        if let Some(entry) = state.tokens.get_mut(token.expose()) {
            entry.revoked = true;
        }
        Ok(())
    }

    async fn wrap_secret_id(
        &self,
        token: &VaultToken,
        role: &str,
        wrap_ttl: &str,
    ) -> Result<WrappedToken, VaultError> {
        let mut state = self.state.lock().unwrap();
        state.check("wrap_secret_id")?;
        state.use_token(token.expose(), "auth/approle/role/secret-id")?;
        let wrapped = state.mint("wrapped");
        let secret_id = state.mint("secret-id");
        state
            .wrapped
            .insert(wrapped.clone(), json!({ "role": role, "secret_id": secret_id }));
        state.wrap_ttls.push(wrap_ttl.to_string());
        Ok(WrappedToken::new(wrapped))
    }

    async fn transit_encrypt(
        &self,
        token: &VaultToken,
        key: &str,
        plaintext: &str,
    ) -> Result<String, VaultError> {
        let mut state = self.state.lock().unwrap();
        state.check("transit_encrypt")?;
        state.use_token(token.expose(), "transit/encrypt")?;
        Ok(format!("vault:v1:{}:{}", key, plaintext))
    }

    async fn write(&self, token: &VaultToken, path: &str, data: &Value) -> Result<(), VaultError> {
        let mut state = self.state.lock().unwrap();
        state.check("write")?;
        state.use_token(token.expose(), path)?;
        state
            .cubbyholes
            .insert((token.expose().to_string(), path.to_string()), data.clone());
        Ok(())
    }

    async fn read(&self, token: &VaultToken, path: &str) -> Result<Option<Value>, VaultError> {
        let mut state = self.state.lock().unwrap();
        state.check("read")?;
        state.use_token(token.expose(), path)?;
        Ok(state
            .cubbyholes
            .get(&(token.expose().to_string(), path.to_string()))
            .cloned())
    }

    async fn unwrap(&self, wrapped: &WrappedToken) -> Result<Value, VaultError> {
        let mut state = self.state.lock().unwrap();
        state.check("unwrap")?;
        state.wrapped.remove(wrapped.expose()).ok_or_else(|| VaultError::Api {
            endpoint: "sys/wrapping/unwrap".to_string(),
            status: 400,
            errors: vec!["wrapping token is not valid or does not exist".to_string()],
        })
    }
}

/// Recover the descriptor from a mock transit ciphertext.
pub fn decrypt_payload(ciphertext: &str, key: &str) -> JobDescriptor {
    let prefix = format!("vault:v1:{}:", key);
    let encoded = ciphertext
        .strip_prefix(&prefix)
        .expect("ciphertext encrypted under the expected key");
    let json = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .expect("plaintext is base64");
    serde_json::from_slice(&json).expect("plaintext is a job descriptor")
}

/// A job service double that answers polls from a script.
///
/// When given a broker it redeems submissions the way the real service
/// does: reading the cubbyhole and unwrapping the secret-id.
pub struct MockJobService {
    broker: Option<Arc<MockBroker>>,
    statuses: Mutex<VecDeque<JobState>>,
    submissions: Mutex<Vec<(JobSubmission, VaultToken)>>,
    redeemed: Mutex<Vec<(Value, Value)>>,
    polls: Mutex<usize>,
    fail_submit: bool,
}

impl MockJobService {
    pub fn new(states: Vec<JobState>) -> Arc<Self> {
        Arc::new(Self::build(None, states, false))
    }

    pub fn redeeming(broker: Arc<MockBroker>, states: Vec<JobState>) -> Arc<Self> {
        Arc::new(Self::build(Some(broker), states, false))
    }

    pub fn rejecting() -> Arc<Self> {
        Arc::new(Self::build(None, Vec::new(), true))
    }

    fn build(broker: Option<Arc<MockBroker>>, states: Vec<JobState>, fail_submit: bool) -> Self {
        Self {
            broker,
            statuses: Mutex::new(states.into()),
            submissions: Mutex::new(Vec::new()),
            redeemed: Mutex::new(Vec::new()),
            polls: Mutex::new(0),
            fail_submit,
        }
    }

    pub fn submissions(&self) -> Vec<(JobSubmission, VaultToken)> {
        self.submissions.lock().unwrap().clone()
    }

    /// `(cubbyhole data, unwrapped secret-id data)` per redeemed submission.
    pub fn redeemed(&self) -> Vec<(Value, Value)> {
        self.redeemed.lock().unwrap().clone()
    }

    pub fn polls(&self) -> usize {
        *self.polls.lock().unwrap()
    }
}

#[async_trait]
impl JobApi for MockJobService {
    async fn submit(
        &self,
        submission: &JobSubmission,
        token: &VaultToken,
    ) -> Result<SubmitResponse, JobServiceError> {
        self.submissions
            .lock()
            .unwrap()
            .push((submission.clone(), token.clone()));

        if self.fail_submit {
            return Err(JobServiceError::Status {
                endpoint: "/v1/api/job".to_string(),
                status: 401,
                body: "token not authorised".to_string(),
            });
        }

        if let Some(broker) = &self.broker {
            let payload = broker
                .read(&submission.cubby_token, &submission.cubby_path)
                .await
                .expect("cubbyhole readable by the job service")
                .expect("payload stored in cubbyhole");
            let secret = broker
                .unwrap(&submission.wrap_secret_id)
                .await
                .expect("wrapped secret-id redeemable");
            self.redeemed.lock().unwrap().push((payload, secret));
        }

        Ok(SubmitResponse {
            id: "abc".to_string(),
            status: JobStatus::Queued,
            qname: submission.qname.clone(),
        })
    }

    async fn poll(&self, id: &str, _token: &VaultToken) -> Result<JobState, JobServiceError> {
        *self.polls.lock().unwrap() += 1;
        let mut statuses = self.statuses.lock().unwrap();
        let mut state = if statuses.len() > 1 {
            statuses.pop_front().expect("non-empty script")
        } else {
            statuses.front().cloned().expect("non-empty script")
        };
        state.id = id.to_string();
        Ok(state)
    }
}

pub fn job_state(status: JobStatus, output: &str, return_code: i32) -> JobState {
    JobState {
        id: "abc".to_string(),
        status,
        node_uuid: "node-1".to_string(),
        qname: "default".to_string(),
        container_image: "alpine".to_string(),
        submitted: "2024-01-01T10:00:00Z".to_string(),
        started: "2024-01-01T10:00:01Z".to_string(),
        ended: "2024-01-01T10:00:02Z".to_string(),
        output: output.to_string(),
        return_code,
    }
}
