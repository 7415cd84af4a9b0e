//! Character create and select flows.
//!
//! Every non-heartbeat frame must carry the account's token until the
//! connection has authenticated once; after that the verified account id
//! is cached on the connection.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use flyagain_common::gateway::FrameHandler;
use flyagain_common::validation::{validate_character_name, CharacterClass};
use flyagain_common::{DataApi, ServiceError, SharedStore, TokenService};
use flyagain_protocol::messages::*;
use flyagain_protocol::{decode_payload, encode_frame, Frame, Opcode};

pub struct AccountService {
    pub data: Arc<dyn DataApi>,
    pub store: SharedStore,
    pub tokens: TokenService,
    pub world_host: String,
    pub world_tcp_port: u16,
    pub world_udp_port: u16,
}

/// Per-connection state: filled on the first successfully verified frame.
#[derive(Default)]
pub struct ConnState {
    pub account_id: Option<i64>,
    pub session_id: Option<String>,
}

impl AccountService {
    fn authenticate(&self, token: &str, conn: &mut ConnState) -> Result<i64, ServiceError> {
        if let Some(account_id) = conn.account_id {
            return Ok(account_id);
        }
        let claims = self.tokens.verify(token)?;
        let account_id = claims.account_id()?;
        conn.account_id = Some(account_id);
        conn.session_id = Some(claims.sid);
        Ok(account_id)
    }

    pub async fn create_character(
        &self,
        req: CharacterCreateRequest,
        conn: &mut ConnState,
    ) -> Result<CharacterCreateResponse, ServiceError> {
        let account_id = self.authenticate(&req.token, conn)?;

        if let Err(message) = validate_character_name(&req.name) {
            return Ok(create_failure(message));
        }
        let Some(class) = CharacterClass::from_name(&req.class) else {
            return Ok(create_failure(format!(
                "Unknown class '{}'. Choose krieger, magier, assassine or kleriker.",
                req.class
            )));
        };

        let created = self
            .data
            .character_create(account_id, &req.name, class.id())
            .await?;

        if !created.success {
            let message = if created.duplicate_name {
                "That name is already taken.".to_string()
            } else {
                created.message
            };
            return Ok(create_failure(message));
        }

        let Some(record) = created.character else {
            return Err(ServiceError::Internal(
                "character create returned no record".to_string(),
            ));
        };
        info!(account_id, character_id = record.id, name = %record.name, "character created");

        Ok(CharacterCreateResponse {
            success: true,
            message: String::new(),
            character: Some(CharacterSummary {
                id: record.id,
                name: record.name,
                class_name: class.label().to_string(),
                class_id: class.id(),
                level: record.level,
            }),
        })
    }

    /// Ownership-checked select: primes `char:{id}` for the world handoff
    /// and records the chosen character on the session.
    pub async fn select_character(
        &self,
        req: CharacterSelectRequest,
        conn: &mut ConnState,
    ) -> Result<CharacterSelectResponse, ServiceError> {
        let account_id = self.authenticate(&req.token, conn)?;

        let Some(record) = self.data.character_get(req.character_id, account_id).await? else {
            warn!(
                account_id,
                character_id = req.character_id,
                "select of missing or foreign character"
            );
            return Err(ServiceError::Forbidden);
        };

        self.store.prime_character_cache(&record).await?;
        if let Some(session_id) = &conn.session_id {
            self.store
                .set_session_character(session_id, record.id)
                .await?;
        }

        info!(account_id, character_id = record.id, "character selected");
        Ok(CharacterSelectResponse {
            success: true,
            message: String::new(),
            character: Some(record),
            world_host: self.world_host.clone(),
            world_tcp_port: self.world_tcp_port as u32,
            world_udp_port: self.world_udp_port as u32,
        })
    }
}

fn create_failure(message: String) -> CharacterCreateResponse {
    CharacterCreateResponse {
        success: false,
        message,
        character: None,
    }
}

#[async_trait]
impl FrameHandler for AccountService {
    type Conn = ConnState;

    async fn handle(
        &self,
        frame: Frame,
        conn: &mut ConnState,
        _peer: SocketAddr,
    ) -> Result<Vec<Frame>, ServiceError> {
        match Opcode::from_u16(frame.opcode) {
            Some(Opcode::CharacterCreate) => {
                let req: CharacterCreateRequest = decode_payload(&frame)?;
                let resp = self.create_character(req, conn).await?;
                Ok(vec![encode_frame(Opcode::CharacterCreate, &resp)])
            }
            Some(Opcode::CharacterSelect) => {
                let req: CharacterSelectRequest = decode_payload(&frame)?;
                let resp = self.select_character(req, conn).await?;
                Ok(vec![encode_frame(Opcode::CharacterSelect, &resp)])
            }
            _ => Err(ServiceError::Protocol(format!(
                "opcode {:#06x} is not an account operation",
                frame.opcode
            ))),
        }
    }
}
