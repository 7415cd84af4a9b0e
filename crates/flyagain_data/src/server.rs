//! Frame-based RPC server.
//!
//! One task per gateway connection. Every request frame produces exactly
//! one response frame; repository failures answer with an RpcError frame
//! and the connection keeps serving.

use futures::{SinkExt, StreamExt};
use sqlx::PgPool;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};

use flyagain_common::validation::CharacterClass;
use flyagain_protocol::messages::*;
use flyagain_protocol::{decode_payload, encode_frame, Frame, FrameCodec, FrameEvent, Opcode};

use crate::repo::{self, RepoError};

pub async fn serve(listener: TcpListener, pool: PgPool) -> anyhow::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        debug!(%peer, "RPC client connected");
        let pool = pool.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, pool).await {
                warn!(%peer, error = %e, "RPC connection ended with error");
            }
            debug!(%peer, "RPC client disconnected");
        });
    }
}

async fn handle_connection(stream: TcpStream, pool: PgPool) -> anyhow::Result<()> {
    stream.set_nodelay(true).ok();
    let mut framed = Framed::new(stream, FrameCodec::default());

    while let Some(event) = framed.next().await {
        let response = match event? {
            FrameEvent::Frame(frame) => dispatch(&pool, &frame).await,
            FrameEvent::Oversized(len) => rpc_error(400, format!("frame of {len} bytes")),
        };
        framed.send(response).await?;
    }
    Ok(())
}

fn rpc_error(code: u32, message: impl Into<String>) -> Frame {
    encode_frame(
        Opcode::RpcError,
        &RpcErrorResponse {
            code,
            message: message.into(),
        },
    )
}

fn ack() -> RpcAck {
    RpcAck {
        success: true,
        message: String::new(),
    }
}

/// Dispatch one request frame. Every arm decodes, executes, encodes; any
/// error is contained to this frame.
pub async fn dispatch(pool: &PgPool, frame: &Frame) -> Frame {
    let Some(opcode) = Opcode::from_u16(frame.opcode) else {
        return rpc_error(400, format!("unknown opcode {:#06x}", frame.opcode));
    };

    let result = route(pool, opcode, frame).await;
    match result {
        Ok(response) => response,
        Err(DispatchError::BadRequest(msg)) => rpc_error(400, msg),
        Err(DispatchError::Repo(e)) => {
            error!(?opcode, error = %e, "repository operation failed");
            rpc_error(500, "data operation failed")
        }
    }
}

enum DispatchError {
    BadRequest(String),
    Repo(RepoError),
}

impl From<RepoError> for DispatchError {
    fn from(e: RepoError) -> Self {
        DispatchError::Repo(e)
    }
}

impl From<flyagain_protocol::FrameError> for DispatchError {
    fn from(e: flyagain_protocol::FrameError) -> Self {
        DispatchError::BadRequest(e.to_string())
    }
}

async fn route(pool: &PgPool, opcode: Opcode, frame: &Frame) -> Result<Frame, DispatchError> {
    let response = match opcode {
        Opcode::AccountGetByUsername => {
            let req: AccountGetByUsernameRequest = decode_payload(frame)?;
            let account = repo::account::get_by_username(pool, &req.username).await?;
            encode_frame(Opcode::AccountGetByUsernameResp, &AccountResponse { account })
        }
        Opcode::AccountGetById => {
            let req: AccountGetByIdRequest = decode_payload(frame)?;
            let account = repo::account::get_by_id(pool, req.account_id).await?;
            encode_frame(Opcode::AccountGetByIdResp, &AccountResponse { account })
        }
        Opcode::AccountCreate => {
            let req: AccountCreateRequest = decode_payload(frame)?;
            let response = match repo::account::create(
                pool,
                &req.username,
                &req.email,
                &req.password_hash,
            )
            .await
            {
                Ok(account_id) => {
                    info!(account_id, username = %req.username, "account created");
                    AccountCreateResponse {
                        success: true,
                        duplicate: false,
                        message: String::new(),
                        account_id,
                    }
                }
                Err(RepoError::Duplicate(field)) => AccountCreateResponse {
                    success: false,
                    duplicate: true,
                    message: format!("{field} already in use"),
                    account_id: 0,
                },
                Err(e) => return Err(e.into()),
            };
            encode_frame(Opcode::AccountCreateResp, &response)
        }
        Opcode::AccountUpdateLastLogin => {
            let req: AccountUpdateLastLoginRequest = decode_payload(frame)?;
            repo::account::update_last_login(pool, req.account_id).await?;
            encode_frame(Opcode::AccountUpdateLastLoginResp, &ack())
        }
        Opcode::AccountCheckBan => {
            let req: CheckBanRequest = decode_payload(frame)?;
            let (banned, reason, banned_until) =
                repo::account::check_ban(pool, req.account_id).await?;
            encode_frame(
                Opcode::AccountCheckBanResp,
                &CheckBanResponse {
                    banned,
                    reason,
                    banned_until,
                },
            )
        }
        Opcode::CharacterGetByAccount => {
            let req: CharacterGetByAccountRequest = decode_payload(frame)?;
            let characters = repo::character::get_by_account(pool, req.account_id).await?;
            encode_frame(
                Opcode::CharacterGetByAccountResp,
                &CharacterListResponse { characters },
            )
        }
        Opcode::CharacterGet => {
            let req: CharacterGetRequest = decode_payload(frame)?;
            let character =
                repo::character::get(pool, req.character_id, req.account_id).await?;
            encode_frame(Opcode::CharacterGetResp, &CharacterGetResponse { character })
        }
        Opcode::CharacterCreateRpc => {
            let req: CharacterCreateRpcRequest = decode_payload(frame)?;
            let Some(class) = CharacterClass::from_id(req.class_id) else {
                return Err(DispatchError::BadRequest(format!(
                    "unknown class id {}",
                    req.class_id
                )));
            };
            let response =
                match repo::character::create(pool, req.account_id, &req.name, class).await {
                    Ok(character) => {
                        info!(
                            character_id = character.id,
                            name = %character.name,
                            "character created"
                        );
                        CharacterCreateRpcResponse {
                            success: true,
                            duplicate_name: false,
                            message: String::new(),
                            character: Some(character),
                        }
                    }
                    Err(RepoError::Duplicate(_)) => CharacterCreateRpcResponse {
                        success: false,
                        duplicate_name: true,
                        message: "name already taken".to_string(),
                        character: None,
                    },
                    Err(RepoError::CharacterLimit) => CharacterCreateRpcResponse {
                        success: false,
                        duplicate_name: false,
                        message: "character limit reached".to_string(),
                        character: None,
                    },
                    Err(e) => return Err(e.into()),
                };
            encode_frame(Opcode::CharacterCreateRpcResp, &response)
        }
        Opcode::CharacterSave => {
            let req: CharacterSaveRequest = decode_payload(frame)?;
            let Some(character) = req.character else {
                return Err(DispatchError::BadRequest("missing character".to_string()));
            };
            repo::character::save(pool, &character).await?;
            encode_frame(Opcode::CharacterSaveResp, &ack())
        }
        Opcode::CharacterDelete => {
            let req: CharacterDeleteRequest = decode_payload(frame)?;
            repo::character::delete(pool, req.character_id, req.account_id).await?;
            encode_frame(Opcode::CharacterDeleteResp, &ack())
        }
        Opcode::CharacterGetSkills => {
            let req: CharacterGetSkillsRequest = decode_payload(frame)?;
            let skills = repo::character::get_skills(pool, req.character_id).await?;
            encode_frame(
                Opcode::CharacterGetSkillsResp,
                &CharacterSkillsResponse { skills },
            )
        }
        Opcode::InventoryGet => {
            let req: InventoryGetRequest = decode_payload(frame)?;
            let items = repo::inventory::get_inventory(pool, req.character_id).await?;
            encode_frame(Opcode::InventoryGetResp, &InventoryResponse { items })
        }
        Opcode::EquipmentGet => {
            let req: InventoryGetRequest = decode_payload(frame)?;
            let items = repo::inventory::get_equipment(pool, req.character_id).await?;
            encode_frame(Opcode::EquipmentGetResp, &InventoryResponse { items })
        }
        Opcode::ItemMove => {
            let req: ItemMoveRpcRequest = decode_payload(frame)?;
            let response = match repo::inventory::move_item(
                pool,
                req.character_id,
                req.from_slot,
                req.to_slot,
            )
            .await
            {
                Ok(()) => ack(),
                Err(RepoError::NotFound) => RpcAck {
                    success: false,
                    message: "invalid slot".to_string(),
                },
                Err(e) => return Err(e.into()),
            };
            encode_frame(Opcode::ItemMoveResp, &response)
        }
        Opcode::ItemAdd => {
            let req: ItemAddRequest = decode_payload(frame)?;
            repo::inventory::add_item(pool, req.character_id, req.item_id, req.quantity).await?;
            encode_frame(Opcode::ItemAddResp, &ack())
        }
        Opcode::ItemRemove => {
            let req: ItemRemoveRequest = decode_payload(frame)?;
            repo::inventory::remove_item(pool, req.character_id, req.slot, req.quantity).await?;
            encode_frame(Opcode::ItemRemoveResp, &ack())
        }
        Opcode::ItemEquip => {
            let req: ItemEquipRequest = decode_payload(frame)?;
            repo::inventory::set_equipped(pool, req.character_id, req.slot, true).await?;
            encode_frame(Opcode::ItemEquipResp, &ack())
        }
        Opcode::ItemUnequip => {
            let req: ItemUnequipRequest = decode_payload(frame)?;
            repo::inventory::set_equipped(pool, req.character_id, req.slot, false).await?;
            encode_frame(Opcode::ItemUnequipResp, &ack())
        }
        Opcode::GameDataGetItems => {
            let items = repo::game_data::get_all_items(pool).await?;
            encode_frame(Opcode::GameDataGetItemsResp, &ItemDefsResponse { items })
        }
        Opcode::GameDataGetMonsters => {
            let monsters = repo::game_data::get_all_monsters(pool).await?;
            encode_frame(
                Opcode::GameDataGetMonstersResp,
                &MonsterDefsResponse { monsters },
            )
        }
        Opcode::GameDataGetSpawns => {
            let spawns = repo::game_data::get_all_spawns(pool).await?;
            encode_frame(Opcode::GameDataGetSpawnsResp, &SpawnsResponse { spawns })
        }
        Opcode::GameDataGetSkills => {
            let skills = repo::game_data::get_all_skills(pool).await?;
            encode_frame(Opcode::GameDataGetSkillsResp, &SkillDefsResponse { skills })
        }
        Opcode::GameDataGetLootTables => {
            let entries = repo::game_data::get_all_loot_tables(pool).await?;
            encode_frame(
                Opcode::GameDataGetLootTablesResp,
                &LootTablesResponse { entries },
            )
        }
        other => {
            return Err(DispatchError::BadRequest(format!(
                "opcode {other:?} is not an RPC request"
            )))
        }
    };
    Ok(response)
}
