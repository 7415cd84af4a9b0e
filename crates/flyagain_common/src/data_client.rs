//! DataService RPC client.
//!
//! The RPC transport is the same length-prefixed protobuf framing the
//! gateways speak, on its own opcode block. The client keeps a small pool
//! of connections; each call holds one connection exclusively for its
//! request/response exchange, so concurrent callers spread over the pool
//! and queue when it is saturated. A transport error poisons the
//! connection; the next caller on that slot re-dials.

use std::sync::atomic::{AtomicUsize, Ordering};

use futures::{SinkExt, StreamExt};
use prost::Message;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::codec::Framed;

use flyagain_protocol::messages::*;
use flyagain_protocol::{decode_payload, encode_frame, Frame, FrameCodec, FrameEvent, Opcode};

use crate::error::ServiceError;

/// The narrow DataService surface the gateways program against. The
/// production implementation is [`DataClient`]; tests substitute in-memory
/// fakes.
#[async_trait::async_trait]
pub trait DataApi: Send + Sync + 'static {
    async fn account_get_by_username(
        &self,
        username: &str,
    ) -> Result<Option<AccountRecord>, ServiceError>;
    async fn account_get_by_id(
        &self,
        account_id: i64,
    ) -> Result<Option<AccountRecord>, ServiceError>;
    async fn account_create(
        &self,
        username: &str,
        email: &str,
        password_hash: &str,
    ) -> Result<AccountCreateResponse, ServiceError>;
    async fn account_update_last_login(&self, account_id: i64) -> Result<(), ServiceError>;
    async fn account_check_ban(&self, account_id: i64) -> Result<CheckBanResponse, ServiceError>;
    async fn character_get_by_account(
        &self,
        account_id: i64,
    ) -> Result<Vec<CharacterRecord>, ServiceError>;
    async fn character_get(
        &self,
        character_id: i64,
        account_id: i64,
    ) -> Result<Option<CharacterRecord>, ServiceError>;
    async fn character_create(
        &self,
        account_id: i64,
        name: &str,
        class_id: u32,
    ) -> Result<CharacterCreateRpcResponse, ServiceError>;
    async fn character_save(&self, character: CharacterRecord) -> Result<(), ServiceError>;
    async fn character_get_skills(
        &self,
        character_id: i64,
    ) -> Result<Vec<SkillRecord>, ServiceError>;
    async fn item_move(
        &self,
        character_id: i64,
        from_slot: u32,
        to_slot: u32,
    ) -> Result<RpcAck, ServiceError>;
    async fn item_add(
        &self,
        character_id: i64,
        item_id: u32,
        quantity: u32,
    ) -> Result<RpcAck, ServiceError>;
    async fn get_all_monsters(&self) -> Result<Vec<MonsterDef>, ServiceError>;
    async fn get_all_spawns(&self) -> Result<Vec<SpawnRecord>, ServiceError>;
    async fn get_all_skills(&self) -> Result<Vec<SkillDef>, ServiceError>;
    async fn get_all_loot_tables(&self) -> Result<Vec<LootTableEntry>, ServiceError>;
}

type RpcConnection = Framed<TcpStream, FrameCodec>;

pub struct DataClient {
    addr: String,
    pool: Vec<Mutex<Option<RpcConnection>>>,
    next: AtomicUsize,
}

impl DataClient {
    /// Connect to the DataService. The first connection is established
    /// eagerly so a service with an unreachable DataService fails at boot.
    pub async fn connect(host: &str, port: u16, pool_size: usize) -> Result<Self, ServiceError> {
        let addr = format!("{host}:{port}");
        let first = Self::dial(&addr).await?;

        let size = pool_size.max(1);
        let mut pool = Vec::with_capacity(size);
        pool.push(Mutex::new(Some(first)));
        for _ in 1..size {
            pool.push(Mutex::new(None));
        }

        Ok(Self {
            addr,
            pool,
            next: AtomicUsize::new(0),
        })
    }

    async fn dial(addr: &str) -> Result<RpcConnection, ServiceError> {
        let stream = TcpStream::connect(addr).await.map_err(|e| {
            tracing::error!(addr, error = %e, "DataService unreachable");
            ServiceError::Unavailable
        })?;
        stream.set_nodelay(true).ok();
        Ok(Framed::new(stream, FrameCodec::default()))
    }

    async fn exchange(&self, request: Frame) -> Result<Frame, ServiceError> {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.pool.len();
        let mut slot = self.pool[idx].lock().await;

        if slot.is_none() {
            *slot = Some(Self::dial(&self.addr).await?);
        }
        let Some(conn) = slot.as_mut() else {
            return Err(ServiceError::Unavailable);
        };

        let result: Result<Frame, ServiceError> = async {
            conn.send(request).await?;
            match conn.next().await {
                Some(Ok(FrameEvent::Frame(frame))) => Ok(frame),
                Some(Ok(FrameEvent::Oversized(len))) => {
                    tracing::error!(len, "oversized RPC response");
                    Err(ServiceError::Unavailable)
                }
                Some(Err(e)) => Err(e.into()),
                None => Err(ServiceError::Unavailable),
            }
        }
        .await;

        if result.is_err() {
            *slot = None;
        }
        result
    }

    async fn call<Req, Resp>(&self, opcode: Opcode, request: &Req) -> Result<Resp, ServiceError>
    where
        Req: Message,
        Resp: Message + Default,
    {
        let response = self.exchange(encode_frame(opcode, request)).await?;

        if response.opcode == Opcode::RpcError as u16 {
            let err: RpcErrorResponse = decode_payload(&response)?;
            tracing::error!(
                opcode = ?opcode,
                code = err.code,
                message = %err.message,
                "DataService reported an error"
            );
            return Err(ServiceError::Unavailable);
        }

        let expected = opcode.rpc_response().map(|op| op as u16);
        if Some(response.opcode) != expected {
            return Err(ServiceError::Internal(format!(
                "mismatched RPC response opcode {:#06x} for request {:?}",
                response.opcode, opcode
            )));
        }
        decode_payload(&response).map_err(Into::into)
    }

    // -- AccountData --------------------------------------------------------

    pub async fn account_get_by_username(
        &self,
        username: &str,
    ) -> Result<Option<AccountRecord>, ServiceError> {
        let resp: AccountResponse = self
            .call(
                Opcode::AccountGetByUsername,
                &AccountGetByUsernameRequest {
                    username: username.to_string(),
                },
            )
            .await?;
        Ok(resp.account)
    }

    pub async fn account_get_by_id(
        &self,
        account_id: i64,
    ) -> Result<Option<AccountRecord>, ServiceError> {
        let resp: AccountResponse = self
            .call(Opcode::AccountGetById, &AccountGetByIdRequest { account_id })
            .await?;
        Ok(resp.account)
    }

    pub async fn account_create(
        &self,
        username: &str,
        email: &str,
        password_hash: &str,
    ) -> Result<AccountCreateResponse, ServiceError> {
        self.call(
            Opcode::AccountCreate,
            &AccountCreateRequest {
                username: username.to_string(),
                email: email.to_string(),
                password_hash: password_hash.to_string(),
            },
        )
        .await
    }

    pub async fn account_update_last_login(&self, account_id: i64) -> Result<(), ServiceError> {
        let _: RpcAck = self
            .call(
                Opcode::AccountUpdateLastLogin,
                &AccountUpdateLastLoginRequest { account_id },
            )
            .await?;
        Ok(())
    }

    pub async fn account_check_ban(
        &self,
        account_id: i64,
    ) -> Result<CheckBanResponse, ServiceError> {
        self.call(Opcode::AccountCheckBan, &CheckBanRequest { account_id })
            .await
    }

    // -- CharacterData ------------------------------------------------------

    pub async fn character_get_by_account(
        &self,
        account_id: i64,
    ) -> Result<Vec<CharacterRecord>, ServiceError> {
        let resp: CharacterListResponse = self
            .call(
                Opcode::CharacterGetByAccount,
                &CharacterGetByAccountRequest { account_id },
            )
            .await?;
        Ok(resp.characters)
    }

    pub async fn character_get(
        &self,
        character_id: i64,
        account_id: i64,
    ) -> Result<Option<CharacterRecord>, ServiceError> {
        let resp: CharacterGetResponse = self
            .call(
                Opcode::CharacterGet,
                &CharacterGetRequest {
                    character_id,
                    account_id,
                },
            )
            .await?;
        Ok(resp.character)
    }

    pub async fn character_create(
        &self,
        account_id: i64,
        name: &str,
        class_id: u32,
    ) -> Result<CharacterCreateRpcResponse, ServiceError> {
        self.call(
            Opcode::CharacterCreateRpc,
            &CharacterCreateRpcRequest {
                account_id,
                name: name.to_string(),
                class_id,
            },
        )
        .await
    }

    pub async fn character_save(&self, character: CharacterRecord) -> Result<(), ServiceError> {
        let ack: RpcAck = self
            .call(
                Opcode::CharacterSave,
                &CharacterSaveRequest {
                    character: Some(character),
                },
            )
            .await?;
        if ack.success {
            Ok(())
        } else {
            Err(ServiceError::Internal(ack.message))
        }
    }

    pub async fn character_delete(
        &self,
        character_id: i64,
        account_id: i64,
    ) -> Result<(), ServiceError> {
        let _: RpcAck = self
            .call(
                Opcode::CharacterDelete,
                &CharacterDeleteRequest {
                    character_id,
                    account_id,
                },
            )
            .await?;
        Ok(())
    }

    pub async fn character_get_skills(
        &self,
        character_id: i64,
    ) -> Result<Vec<SkillRecord>, ServiceError> {
        let resp: CharacterSkillsResponse = self
            .call(
                Opcode::CharacterGetSkills,
                &CharacterGetSkillsRequest { character_id },
            )
            .await?;
        Ok(resp.skills)
    }

    // -- InventoryData ------------------------------------------------------

    pub async fn inventory_get(&self, character_id: i64) -> Result<Vec<ItemStack>, ServiceError> {
        let resp: InventoryResponse = self
            .call(Opcode::InventoryGet, &InventoryGetRequest { character_id })
            .await?;
        Ok(resp.items)
    }

    pub async fn equipment_get(&self, character_id: i64) -> Result<Vec<ItemStack>, ServiceError> {
        let resp: InventoryResponse = self
            .call(Opcode::EquipmentGet, &InventoryGetRequest { character_id })
            .await?;
        Ok(resp.items)
    }

    pub async fn item_move(
        &self,
        character_id: i64,
        from_slot: u32,
        to_slot: u32,
    ) -> Result<RpcAck, ServiceError> {
        self.call(
            Opcode::ItemMove,
            &ItemMoveRpcRequest {
                character_id,
                from_slot,
                to_slot,
            },
        )
        .await
    }

    pub async fn item_add(
        &self,
        character_id: i64,
        item_id: u32,
        quantity: u32,
    ) -> Result<RpcAck, ServiceError> {
        self.call(
            Opcode::ItemAdd,
            &ItemAddRequest {
                character_id,
                item_id,
                quantity,
            },
        )
        .await
    }

    pub async fn item_remove(
        &self,
        character_id: i64,
        slot: u32,
        quantity: u32,
    ) -> Result<RpcAck, ServiceError> {
        self.call(
            Opcode::ItemRemove,
            &ItemRemoveRequest {
                character_id,
                slot,
                quantity,
            },
        )
        .await
    }

    pub async fn item_equip(&self, character_id: i64, slot: u32) -> Result<RpcAck, ServiceError> {
        self.call(Opcode::ItemEquip, &ItemEquipRequest { character_id, slot })
            .await
    }

    pub async fn item_unequip(&self, character_id: i64, slot: u32) -> Result<RpcAck, ServiceError> {
        self.call(
            Opcode::ItemUnequip,
            &ItemUnequipRequest { character_id, slot },
        )
        .await
    }

    // -- GameData -----------------------------------------------------------

    pub async fn get_all_items(&self) -> Result<Vec<ItemDef>, ServiceError> {
        let resp: ItemDefsResponse = self
            .call(Opcode::GameDataGetItems, &GameDataRequest {})
            .await?;
        Ok(resp.items)
    }

    pub async fn get_all_monsters(&self) -> Result<Vec<MonsterDef>, ServiceError> {
        let resp: MonsterDefsResponse = self
            .call(Opcode::GameDataGetMonsters, &GameDataRequest {})
            .await?;
        Ok(resp.monsters)
    }

    pub async fn get_all_spawns(&self) -> Result<Vec<SpawnRecord>, ServiceError> {
        let resp: SpawnsResponse = self
            .call(Opcode::GameDataGetSpawns, &GameDataRequest {})
            .await?;
        Ok(resp.spawns)
    }

    pub async fn get_all_skills(&self) -> Result<Vec<SkillDef>, ServiceError> {
        let resp: SkillDefsResponse = self
            .call(Opcode::GameDataGetSkills, &GameDataRequest {})
            .await?;
        Ok(resp.skills)
    }

    pub async fn get_all_loot_tables(&self) -> Result<Vec<LootTableEntry>, ServiceError> {
        let resp: LootTablesResponse = self
            .call(Opcode::GameDataGetLootTables, &GameDataRequest {})
            .await?;
        Ok(resp.entries)
    }
}

#[async_trait::async_trait]
impl DataApi for DataClient {
    async fn account_get_by_username(
        &self,
        username: &str,
    ) -> Result<Option<AccountRecord>, ServiceError> {
        DataClient::account_get_by_username(self, username).await
    }

    async fn account_get_by_id(
        &self,
        account_id: i64,
    ) -> Result<Option<AccountRecord>, ServiceError> {
        DataClient::account_get_by_id(self, account_id).await
    }

    async fn account_create(
        &self,
        username: &str,
        email: &str,
        password_hash: &str,
    ) -> Result<AccountCreateResponse, ServiceError> {
        DataClient::account_create(self, username, email, password_hash).await
    }

    async fn account_update_last_login(&self, account_id: i64) -> Result<(), ServiceError> {
        DataClient::account_update_last_login(self, account_id).await
    }

    async fn account_check_ban(&self, account_id: i64) -> Result<CheckBanResponse, ServiceError> {
        DataClient::account_check_ban(self, account_id).await
    }

    async fn character_get_by_account(
        &self,
        account_id: i64,
    ) -> Result<Vec<CharacterRecord>, ServiceError> {
        DataClient::character_get_by_account(self, account_id).await
    }

    async fn character_get(
        &self,
        character_id: i64,
        account_id: i64,
    ) -> Result<Option<CharacterRecord>, ServiceError> {
        DataClient::character_get(self, character_id, account_id).await
    }

    async fn character_create(
        &self,
        account_id: i64,
        name: &str,
        class_id: u32,
    ) -> Result<CharacterCreateRpcResponse, ServiceError> {
        DataClient::character_create(self, account_id, name, class_id).await
    }

    async fn character_save(&self, character: CharacterRecord) -> Result<(), ServiceError> {
        DataClient::character_save(self, character).await
    }

    async fn character_get_skills(
        &self,
        character_id: i64,
    ) -> Result<Vec<SkillRecord>, ServiceError> {
        DataClient::character_get_skills(self, character_id).await
    }

    async fn item_move(
        &self,
        character_id: i64,
        from_slot: u32,
        to_slot: u32,
    ) -> Result<RpcAck, ServiceError> {
        DataClient::item_move(self, character_id, from_slot, to_slot).await
    }

    async fn item_add(
        &self,
        character_id: i64,
        item_id: u32,
        quantity: u32,
    ) -> Result<RpcAck, ServiceError> {
        DataClient::item_add(self, character_id, item_id, quantity).await
    }

    async fn get_all_monsters(&self) -> Result<Vec<MonsterDef>, ServiceError> {
        DataClient::get_all_monsters(self).await
    }

    async fn get_all_spawns(&self) -> Result<Vec<SpawnRecord>, ServiceError> {
        DataClient::get_all_spawns(self).await
    }

    async fn get_all_skills(&self) -> Result<Vec<SkillDef>, ServiceError> {
        DataClient::get_all_skills(self).await
    }

    async fn get_all_loot_tables(&self) -> Result<Vec<LootTableEntry>, ServiceError> {
        DataClient::get_all_loot_tables(self).await
    }
}
