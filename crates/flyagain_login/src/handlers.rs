//! Register and login flows.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use flyagain_common::gateway::FrameHandler;
use flyagain_common::store::{generate_hmac_secret, generate_session_id};
use flyagain_common::validation::{validate_email, validate_password, validate_username};
use flyagain_common::{
    unix_now, DataApi, PasswordVerifier, ServiceError, SessionData, SharedStore, TokenService,
};
use flyagain_protocol::messages::*;
use flyagain_protocol::{decode_payload, encode_frame, Frame, Opcode};

/// One string for both unknown accounts and wrong passwords, so usernames
/// cannot be enumerated.
pub const INVALID_CREDENTIALS: &str = "Invalid username or password.";

const REGISTER_LIMIT: u64 = 3;
const REGISTER_WINDOW_SECS: u64 = 3_600;
const LOGIN_LIMIT: u64 = 5;
const LOGIN_WINDOW_SECS: u64 = 60;

pub struct LoginService {
    pub data: Arc<dyn DataApi>,
    pub store: SharedStore,
    pub tokens: TokenService,
    pub passwords: PasswordVerifier,
    pub session_ttl_secs: u64,
    pub account_host: String,
    pub account_port: u16,
}

impl LoginService {
    /// Registration. The window counts every attempt, successful or not,
    /// so the counter is bumped before any validation.
    pub async fn register(
        &self,
        req: RegisterRequest,
        ip: &str,
    ) -> Result<RegisterResponse, ServiceError> {
        let key = SharedStore::rate_limit_key(ip, "register");
        let count = self
            .store
            .fixed_window_count(&key, REGISTER_WINDOW_SECS)
            .await?;
        if count > REGISTER_LIMIT {
            return Err(ServiceError::RateLimited {
                retry_after_secs: REGISTER_WINDOW_SECS,
            });
        }

        for check in [
            validate_username(&req.username),
            validate_email(&req.email),
            validate_password(&req.password),
        ] {
            if let Err(message) = check {
                return Ok(RegisterResponse {
                    success: false,
                    message,
                });
            }
        }

        let passwords = self.passwords;
        let password = req.password.clone();
        let hash = tokio::task::spawn_blocking(move || passwords.hash(&password))
            .await
            .map_err(|e| ServiceError::Internal(e.to_string()))??;

        let created = self
            .data
            .account_create(&req.username, &req.email, &hash)
            .await?;

        if created.success {
            info!(username = %req.username, account_id = created.account_id, "account registered");
            Ok(RegisterResponse {
                success: true,
                message: "Account created. You can log in now.".to_string(),
            })
        } else {
            Ok(RegisterResponse {
                success: false,
                message: if created.duplicate {
                    format!("That {} is already registered.", dup_field(&created.message))
                } else {
                    created.message
                },
            })
        }
    }

    pub async fn login(&self, req: LoginRequest, ip: &str) -> Result<LoginResponse, ServiceError> {
        let key = SharedStore::rate_limit_key(ip, "login");
        let count = self
            .store
            .fixed_window_count(&key, LOGIN_WINDOW_SECS)
            .await?;
        if count > LOGIN_LIMIT {
            return Err(ServiceError::RateLimited {
                retry_after_secs: LOGIN_WINDOW_SECS,
            });
        }

        let Some(account) = self.data.account_get_by_username(&req.username).await? else {
            return Ok(login_failure(INVALID_CREDENTIALS));
        };

        let passwords = self.passwords;
        let password = req.password.clone();
        let stored = account.password_hash.clone();
        let verified = tokio::task::spawn_blocking(move || passwords.verify(&password, &stored))
            .await
            .map_err(|e| ServiceError::Internal(e.to_string()))?;
        if !verified {
            debug!(username = %req.username, "password verification failed");
            return Ok(login_failure(INVALID_CREDENTIALS));
        }

        if ban_active(&account) {
            warn!(account_id = account.id, "banned account attempted login");
            return Ok(login_failure(&format!(
                "Account banned: {}",
                account.ban_reason
            )));
        }

        // Single session per account: the previous one is evicted now and
        // its client dropped on its next heartbeat.
        if let Some(old) = self.store.evict_session(account.id).await? {
            info!(account_id = account.id, old_session = %old, "evicted previous session");
        }

        let session = SessionData {
            session_id: generate_session_id(),
            account_id: account.id,
            character_id: 0,
            ip: ip.to_string(),
            login_time: unix_now(),
            hmac_secret: generate_hmac_secret(),
        };
        self.store
            .create_session(&session, self.session_ttl_secs)
            .await?;

        let token = self
            .tokens
            .mint(account.id, &session.session_id, &account.username)?;

        let characters = self
            .data
            .character_get_by_account(account.id)
            .await?
            .into_iter()
            .map(|c| CharacterSummary {
                id: c.id,
                name: c.name,
                class_name: flyagain_common::validation::CharacterClass::from_id(c.class_id)
                    .map(|class| class.label().to_string())
                    .unwrap_or_default(),
                class_id: c.class_id,
                level: c.level,
            })
            .collect();

        // Non-critical update: log and swallow.
        let data = Arc::clone(&self.data);
        let account_id = account.id;
        tokio::spawn(async move {
            if let Err(e) = data.account_update_last_login(account_id).await {
                debug!(account_id, error = %e, "last-login update failed");
            }
        });

        info!(account_id = account.id, username = %account.username, "login successful");
        Ok(LoginResponse {
            success: true,
            message: String::new(),
            token,
            hmac_secret: session.hmac_secret,
            account_host: self.account_host.clone(),
            account_port: self.account_port as u32,
            characters,
        })
    }
}

fn login_failure(message: &str) -> LoginResponse {
    LoginResponse {
        success: false,
        message: message.to_string(),
        ..Default::default()
    }
}

fn ban_active(account: &AccountRecord) -> bool {
    account.banned && (account.banned_until == 0 || account.banned_until > unix_now())
}

fn dup_field(message: &str) -> &str {
    if message.contains("email") {
        "email"
    } else {
        "username"
    }
}

#[async_trait]
impl FrameHandler for LoginService {
    type Conn = ();

    async fn handle(
        &self,
        frame: Frame,
        _conn: &mut (),
        peer: SocketAddr,
    ) -> Result<Vec<Frame>, ServiceError> {
        let ip = peer.ip().to_string();
        match Opcode::from_u16(frame.opcode) {
            Some(Opcode::RegisterRequest) => {
                let req: RegisterRequest = decode_payload(&frame)?;
                let resp = self.register(req, &ip).await?;
                Ok(vec![encode_frame(Opcode::RegisterResponse, &resp)])
            }
            Some(Opcode::LoginRequest) => {
                let req: LoginRequest = decode_payload(&frame)?;
                let resp = self.login(req, &ip).await?;
                Ok(vec![encode_frame(Opcode::LoginResponse, &resp)])
            }
            _ => Err(ServiceError::Protocol(format!(
                "opcode {:#06x} is not a login operation",
                frame.opcode
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    use flyagain_common::store::MemoryKv;

    /// In-memory DataService stand-in covering the login surface.
    #[derive(Default)]
    struct FakeData {
        accounts: Mutex<Vec<AccountRecord>>,
        characters: Mutex<Vec<CharacterRecord>>,
    }

    #[async_trait]
    impl DataApi for FakeData {
        async fn account_get_by_username(
            &self,
            username: &str,
        ) -> Result<Option<AccountRecord>, ServiceError> {
            Ok(self
                .accounts
                .lock()
                .iter()
                .find(|a| a.username == username)
                .cloned())
        }

        async fn account_get_by_id(
            &self,
            account_id: i64,
        ) -> Result<Option<AccountRecord>, ServiceError> {
            Ok(self
                .accounts
                .lock()
                .iter()
                .find(|a| a.id == account_id)
                .cloned())
        }

        async fn account_create(
            &self,
            username: &str,
            email: &str,
            password_hash: &str,
        ) -> Result<AccountCreateResponse, ServiceError> {
            let mut accounts = self.accounts.lock();
            if accounts
                .iter()
                .any(|a| a.username == username || a.email == email)
            {
                return Ok(AccountCreateResponse {
                    success: false,
                    duplicate: true,
                    message: "username already in use".to_string(),
                    account_id: 0,
                });
            }
            let id = accounts.len() as i64 + 1;
            accounts.push(AccountRecord {
                id,
                username: username.to_string(),
                email: email.to_string(),
                password_hash: password_hash.to_string(),
                created_at: unix_now(),
                ..Default::default()
            });
            Ok(AccountCreateResponse {
                success: true,
                duplicate: false,
                message: String::new(),
                account_id: id,
            })
        }

        async fn account_update_last_login(&self, _account_id: i64) -> Result<(), ServiceError> {
            Ok(())
        }

        async fn account_check_ban(
            &self,
            _account_id: i64,
        ) -> Result<CheckBanResponse, ServiceError> {
            Ok(CheckBanResponse::default())
        }

        async fn character_get_by_account(
            &self,
            account_id: i64,
        ) -> Result<Vec<CharacterRecord>, ServiceError> {
            Ok(self
                .characters
                .lock()
                .iter()
                .filter(|c| c.account_id == account_id)
                .cloned()
                .collect())
        }

        async fn character_get(
            &self,
            _character_id: i64,
            _account_id: i64,
        ) -> Result<Option<CharacterRecord>, ServiceError> {
            Ok(None)
        }

        async fn character_create(
            &self,
            _account_id: i64,
            _name: &str,
            _class_id: u32,
        ) -> Result<CharacterCreateRpcResponse, ServiceError> {
            Err(ServiceError::Unavailable)
        }

        async fn character_save(&self, _character: CharacterRecord) -> Result<(), ServiceError> {
            Ok(())
        }

        async fn character_get_skills(
            &self,
            _character_id: i64,
        ) -> Result<Vec<SkillRecord>, ServiceError> {
            Ok(Vec::new())
        }

        async fn item_move(
            &self,
            _character_id: i64,
            _from_slot: u32,
            _to_slot: u32,
        ) -> Result<RpcAck, ServiceError> {
            Err(ServiceError::Unavailable)
        }

        async fn item_add(
            &self,
            _character_id: i64,
            _item_id: u32,
            _quantity: u32,
        ) -> Result<RpcAck, ServiceError> {
            Err(ServiceError::Unavailable)
        }

        async fn get_all_monsters(&self) -> Result<Vec<MonsterDef>, ServiceError> {
            Ok(Vec::new())
        }

        async fn get_all_spawns(&self) -> Result<Vec<SpawnRecord>, ServiceError> {
            Ok(Vec::new())
        }

        async fn get_all_skills(&self) -> Result<Vec<SkillDef>, ServiceError> {
            Ok(Vec::new())
        }

        async fn get_all_loot_tables(&self) -> Result<Vec<LootTableEntry>, ServiceError> {
            Ok(Vec::new())
        }
    }

    fn service() -> (LoginService, Arc<MemoryKv>) {
        let kv = Arc::new(MemoryKv::new());
        let svc = LoginService {
            data: Arc::new(FakeData::default()),
            store: SharedStore::with_backend(kv.clone()),
            tokens: TokenService::new("test-secret", 3_600),
            passwords: PasswordVerifier::new(4).unwrap(),
            session_ttl_secs: 86_400,
            account_host: "127.0.0.1".to_string(),
            account_port: 7779,
        };
        (svc, kv)
    }

    fn register_req() -> RegisterRequest {
        RegisterRequest {
            username: "neo".to_string(),
            email: "neo@x.io".to_string(),
            password: "hunter2xx".to_string(),
        }
    }

    fn login_req(username: &str, password: &str) -> LoginRequest {
        LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_register_then_login() {
        let (svc, _) = service();

        let reg = svc.register(register_req(), "10.0.0.1").await.unwrap();
        assert!(reg.success, "{}", reg.message);

        let login = svc
            .login(login_req("neo", "hunter2xx"), "10.0.0.1")
            .await
            .unwrap();
        assert!(login.success);
        assert!(login.characters.is_empty());
        assert_eq!(login.hmac_secret.len(), 43);
        assert_eq!(login.account_port, 7779);

        let claims = svc.tokens.verify(&login.token).unwrap();
        assert_eq!(claims.account_id().unwrap(), 1);
        assert_eq!(claims.username, "neo");

        let session = svc.store.get_session(&claims.sid).await.unwrap().unwrap();
        assert_eq!(session.account_id, 1);
        assert_eq!(session.character_id, 0);
        assert_eq!(session.hmac_secret, login.hmac_secret);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unknown_user_and_wrong_password_are_indistinguishable() {
        let (svc, _) = service();
        svc.register(register_req(), "10.0.0.1").await.unwrap();

        let unknown = svc
            .login(login_req("unknownUser", "anything"), "10.0.0.2")
            .await
            .unwrap();
        let wrong = svc
            .login(login_req("neo", "wrongpass"), "10.0.0.3")
            .await
            .unwrap();

        assert!(!unknown.success);
        assert!(!wrong.success);
        assert_eq!(unknown.message, wrong.message);
        assert_eq!(unknown.message, INVALID_CREDENTIALS);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_second_login_evicts_first_session() {
        let (svc, _) = service();
        svc.register(register_req(), "10.0.0.1").await.unwrap();

        let first = svc
            .login(login_req("neo", "hunter2xx"), "10.0.0.1")
            .await
            .unwrap();
        let first_sid = svc.tokens.verify(&first.token).unwrap().sid;

        let second = svc
            .login(login_req("neo", "hunter2xx"), "10.0.0.1")
            .await
            .unwrap();
        let second_sid = svc.tokens.verify(&second.token).unwrap().sid;

        assert!(svc.store.get_session(&first_sid).await.unwrap().is_none());
        assert_eq!(
            svc.store.session_for_account(1).await.unwrap(),
            Some(second_sid)
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_login_rate_limit_window() {
        let (svc, kv) = service();
        svc.register(register_req(), "10.9.9.9").await.unwrap();

        for _ in 0..5 {
            svc.login(login_req("neo", "wrongpass"), "10.0.0.7")
                .await
                .unwrap();
        }
        let sixth = svc.login(login_req("neo", "hunter2xx"), "10.0.0.7").await;
        assert!(matches!(sixth, Err(ServiceError::RateLimited { .. })));

        // A different address is unaffected.
        assert!(svc
            .login(login_req("neo", "hunter2xx"), "10.0.0.8")
            .await
            .unwrap()
            .success);

        // After the window expires the counter resets.
        kv.advance_secs(61);
        assert!(svc
            .login(login_req("neo", "hunter2xx"), "10.0.0.7")
            .await
            .unwrap()
            .success);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_register_rate_limit_counts_failures() {
        let (svc, _) = service();

        // Three failed attempts exhaust the window.
        for _ in 0..3 {
            let resp = svc
                .register(
                    RegisterRequest {
                        username: "x".to_string(), // too short
                        email: "neo@x.io".to_string(),
                        password: "hunter2xx".to_string(),
                    },
                    "10.0.0.1",
                )
                .await
                .unwrap();
            assert!(!resp.success);
        }
        let fourth = svc.register(register_req(), "10.0.0.1").await;
        assert!(matches!(fourth, Err(ServiceError::RateLimited { .. })));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_register_validation_messages() {
        let (svc, _) = service();

        let bad_email = RegisterRequest {
            email: "nope".to_string(),
            ..register_req()
        };
        assert!(!svc.register(bad_email, "10.1.0.1").await.unwrap().success);

        let bad_password = RegisterRequest {
            password: "short".to_string(),
            ..register_req()
        };
        assert!(!svc.register(bad_password, "10.1.0.2").await.unwrap().success);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_duplicate_username_is_a_distinguishable_error() {
        let (svc, _) = service();
        svc.register(register_req(), "10.0.0.1").await.unwrap();

        let dup = svc.register(register_req(), "10.0.0.2").await.unwrap();
        assert!(!dup.success);
        assert_ne!(dup.message, INVALID_CREDENTIALS);
        assert!(dup.message.contains("already"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_banned_account_sees_reason() {
        let kv = Arc::new(MemoryKv::new());
        let data = FakeData::default();
        data.accounts.lock().push(AccountRecord {
            id: 1,
            username: "neo".to_string(),
            email: "neo@x.io".to_string(),
            password_hash: PasswordVerifier::new(4).unwrap().hash("hunter2xx").unwrap(),
            banned: true,
            ban_reason: "botting".to_string(),
            ..Default::default()
        });
        let svc = LoginService {
            data: Arc::new(data),
            store: SharedStore::with_backend(kv),
            tokens: TokenService::new("test-secret", 3_600),
            passwords: PasswordVerifier::new(4).unwrap(),
            session_ttl_secs: 86_400,
            account_host: "127.0.0.1".to_string(),
            account_port: 7779,
        };

        let resp = svc
            .login(login_req("neo", "hunter2xx"), "10.0.0.1")
            .await
            .unwrap();
        assert!(!resp.success);
        assert!(resp.message.contains("botting"));
    }
}
