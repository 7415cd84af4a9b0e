//! Protobuf payload definitions for every opcode.
//!
//! Messages are hand-derived with prost; both sides of every exchange link
//! this crate, so the struct definitions are the schema.

/// Wire values for entity kinds inside sync messages.
pub const ENTITY_KIND_PLAYER: u32 = 1;
pub const ENTITY_KIND_MONSTER: u32 = 2;

// ---------------------------------------------------------------------------
// Login service
// ---------------------------------------------------------------------------

#[derive(Clone, PartialEq, prost::Message)]
pub struct LoginRequest {
    #[prost(string, tag = "1")]
    pub username: String,
    #[prost(string, tag = "2")]
    pub password: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CharacterSummary {
    #[prost(int64, tag = "1")]
    pub id: i64,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(uint32, tag = "3")]
    pub class_id: u32,
    #[prost(string, tag = "4")]
    pub class_name: String,
    #[prost(uint32, tag = "5")]
    pub level: u32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct LoginResponse {
    #[prost(bool, tag = "1")]
    pub success: bool,
    #[prost(string, tag = "2")]
    pub message: String,
    #[prost(string, tag = "3")]
    pub token: String,
    #[prost(string, tag = "4")]
    pub hmac_secret: String,
    #[prost(string, tag = "5")]
    pub account_host: String,
    #[prost(uint32, tag = "6")]
    pub account_port: u32,
    #[prost(message, repeated, tag = "7")]
    pub characters: Vec<CharacterSummary>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct RegisterRequest {
    #[prost(string, tag = "1")]
    pub username: String,
    #[prost(string, tag = "2")]
    pub email: String,
    #[prost(string, tag = "3")]
    pub password: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct RegisterResponse {
    #[prost(bool, tag = "1")]
    pub success: bool,
    #[prost(string, tag = "2")]
    pub message: String,
}

// ---------------------------------------------------------------------------
// Account service
// ---------------------------------------------------------------------------

#[derive(Clone, PartialEq, prost::Message)]
pub struct CharacterCreateRequest {
    #[prost(string, tag = "1")]
    pub token: String,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(string, tag = "3")]
    pub class: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CharacterCreateResponse {
    #[prost(bool, tag = "1")]
    pub success: bool,
    #[prost(string, tag = "2")]
    pub message: String,
    #[prost(message, optional, tag = "3")]
    pub character: Option<CharacterSummary>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CharacterSelectRequest {
    #[prost(string, tag = "1")]
    pub token: String,
    #[prost(int64, tag = "2")]
    pub character_id: i64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CharacterSelectResponse {
    #[prost(bool, tag = "1")]
    pub success: bool,
    #[prost(string, tag = "2")]
    pub message: String,
    #[prost(message, optional, tag = "3")]
    pub character: Option<CharacterRecord>,
    #[prost(string, tag = "4")]
    pub world_host: String,
    #[prost(uint32, tag = "5")]
    pub world_tcp_port: u32,
    #[prost(uint32, tag = "6")]
    pub world_udp_port: u32,
}

// ---------------------------------------------------------------------------
// World service
// ---------------------------------------------------------------------------

#[derive(Clone, PartialEq, prost::Message)]
pub struct EnterWorldRequest {
    #[prost(string, tag = "1")]
    pub token: String,
    #[prost(int64, tag = "2")]
    pub character_id: i64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct MovementInput {
    #[prost(float, tag = "1")]
    pub dx: f32,
    #[prost(float, tag = "2")]
    pub dy: f32,
    #[prost(float, tag = "3")]
    pub dz: f32,
    #[prost(float, tag = "4")]
    pub rotation: f32,
    #[prost(bool, tag = "5")]
    pub moving: bool,
    #[prost(bool, tag = "6")]
    pub flying: bool,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SelectTarget {
    #[prost(uint64, tag = "1")]
    pub target_entity_id: u64,
    #[prost(bool, tag = "2")]
    pub auto_attack: bool,
}

/// Snapshot of one visible entity, used for spawns and zone data.
#[derive(Clone, PartialEq, prost::Message)]
pub struct EntityState {
    #[prost(uint64, tag = "1")]
    pub entity_id: u64,
    #[prost(uint32, tag = "2")]
    pub kind: u32,
    #[prost(string, tag = "3")]
    pub name: String,
    #[prost(uint32, tag = "4")]
    pub class_or_definition_id: u32,
    #[prost(uint32, tag = "5")]
    pub level: u32,
    #[prost(float, tag = "6")]
    pub x: f32,
    #[prost(float, tag = "7")]
    pub y: f32,
    #[prost(float, tag = "8")]
    pub z: f32,
    #[prost(float, tag = "9")]
    pub rotation: f32,
    #[prost(int32, tag = "10")]
    pub hp: i32,
    #[prost(int32, tag = "11")]
    pub max_hp: i32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct EntityMove {
    #[prost(uint64, tag = "1")]
    pub entity_id: u64,
    #[prost(float, tag = "2")]
    pub x: f32,
    #[prost(float, tag = "3")]
    pub y: f32,
    #[prost(float, tag = "4")]
    pub z: f32,
    #[prost(float, tag = "5")]
    pub rotation: f32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct DamageResult {
    #[prost(uint64, tag = "1")]
    pub attacker_id: u64,
    #[prost(uint64, tag = "2")]
    pub target_id: u64,
    #[prost(int32, tag = "3")]
    pub amount: i32,
    #[prost(bool, tag = "4")]
    pub crit: bool,
    #[prost(int32, tag = "5")]
    pub target_hp: i32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct DeathEvent {
    #[prost(uint64, tag = "1")]
    pub entity_id: u64,
    #[prost(uint64, tag = "2")]
    pub killer_id: u64,
    #[prost(int64, tag = "3")]
    pub xp_awarded: i64,
}

/// Per-tick entity synchronization envelope (opcode 0x0301). Spawns,
/// despawns, movement, and combat results share one frame per recipient.
#[derive(Clone, PartialEq, prost::Message)]
pub struct EntitySync {
    #[prost(message, repeated, tag = "1")]
    pub spawns: Vec<EntityState>,
    #[prost(uint64, repeated, tag = "2")]
    pub despawns: Vec<u64>,
    #[prost(message, repeated, tag = "3")]
    pub moves: Vec<EntityMove>,
    #[prost(message, repeated, tag = "4")]
    pub damage: Vec<DamageResult>,
    #[prost(message, repeated, tag = "5")]
    pub deaths: Vec<DeathEvent>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct MoveItemRequest {
    #[prost(uint32, tag = "1")]
    pub from_slot: u32,
    #[prost(uint32, tag = "2")]
    pub to_slot: u32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct MoveItemResult {
    #[prost(bool, tag = "1")]
    pub success: bool,
    #[prost(string, tag = "2")]
    pub message: String,
    #[prost(uint32, tag = "3")]
    pub from_slot: u32,
    #[prost(uint32, tag = "4")]
    pub to_slot: u32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ChatMessage {
    #[prost(uint64, tag = "1")]
    pub sender_entity_id: u64,
    #[prost(string, tag = "2")]
    pub sender_name: String,
    #[prost(string, tag = "3")]
    pub text: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Heartbeat {
    #[prost(uint64, tag = "1")]
    pub client_time_ms: u64,
    #[prost(uint64, tag = "2")]
    pub server_time_ms: u64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ZoneData {
    #[prost(uint32, tag = "1")]
    pub zone_id: u32,
    #[prost(string, tag = "2")]
    pub zone_name: String,
    #[prost(uint32, tag = "3")]
    pub channel_id: u32,
    #[prost(uint64, tag = "4")]
    pub entity_id: u64,
    #[prost(float, tag = "5")]
    pub x: f32,
    #[prost(float, tag = "6")]
    pub y: f32,
    #[prost(float, tag = "7")]
    pub z: f32,
    #[prost(message, repeated, tag = "8")]
    pub entities: Vec<EntityState>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ChannelSwitchRequest {
    #[prost(uint32, tag = "1")]
    pub channel_id: u32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ChannelInfo {
    #[prost(uint32, tag = "1")]
    pub channel_id: u32,
    #[prost(uint32, tag = "2")]
    pub players: u32,
    #[prost(uint32, tag = "3")]
    pub capacity: u32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ChannelListResponse {
    #[prost(uint32, tag = "1")]
    pub zone_id: u32,
    #[prost(message, repeated, tag = "2")]
    pub channels: Vec<ChannelInfo>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct PositionCorrection {
    #[prost(float, tag = "1")]
    pub x: f32,
    #[prost(float, tag = "2")]
    pub y: f32,
    #[prost(float, tag = "3")]
    pub z: f32,
    #[prost(float, tag = "4")]
    pub rotation: f32,
    #[prost(string, tag = "5")]
    pub reason: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ErrorResponse {
    #[prost(uint32, tag = "1")]
    pub opcode: u32,
    #[prost(uint32, tag = "2")]
    pub code: u32,
    #[prost(string, tag = "3")]
    pub message: String,
}

// ---------------------------------------------------------------------------
// DataService RPC: accounts
// ---------------------------------------------------------------------------

#[derive(Clone, PartialEq, prost::Message)]
pub struct AccountRecord {
    #[prost(int64, tag = "1")]
    pub id: i64,
    #[prost(string, tag = "2")]
    pub username: String,
    #[prost(string, tag = "3")]
    pub email: String,
    #[prost(string, tag = "4")]
    pub password_hash: String,
    #[prost(int64, tag = "5")]
    pub created_at: i64,
    #[prost(int64, tag = "6")]
    pub last_login: i64,
    #[prost(bool, tag = "7")]
    pub banned: bool,
    #[prost(string, tag = "8")]
    pub ban_reason: String,
    #[prost(int64, tag = "9")]
    pub banned_until: i64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct AccountGetByUsernameRequest {
    #[prost(string, tag = "1")]
    pub username: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct AccountGetByIdRequest {
    #[prost(int64, tag = "1")]
    pub account_id: i64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct AccountResponse {
    #[prost(message, optional, tag = "1")]
    pub account: Option<AccountRecord>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct AccountCreateRequest {
    #[prost(string, tag = "1")]
    pub username: String,
    #[prost(string, tag = "2")]
    pub email: String,
    #[prost(string, tag = "3")]
    pub password_hash: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct AccountCreateResponse {
    #[prost(bool, tag = "1")]
    pub success: bool,
    #[prost(bool, tag = "2")]
    pub duplicate: bool,
    #[prost(string, tag = "3")]
    pub message: String,
    #[prost(int64, tag = "4")]
    pub account_id: i64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct AccountUpdateLastLoginRequest {
    #[prost(int64, tag = "1")]
    pub account_id: i64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CheckBanRequest {
    #[prost(int64, tag = "1")]
    pub account_id: i64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CheckBanResponse {
    #[prost(bool, tag = "1")]
    pub banned: bool,
    #[prost(string, tag = "2")]
    pub reason: String,
    #[prost(int64, tag = "3")]
    pub banned_until: i64,
}

/// Generic acknowledgment for RPC writes.
#[derive(Clone, PartialEq, prost::Message)]
pub struct RpcAck {
    #[prost(bool, tag = "1")]
    pub success: bool,
    #[prost(string, tag = "2")]
    pub message: String,
}

// ---------------------------------------------------------------------------
// DataService RPC: characters
// ---------------------------------------------------------------------------

/// The full persistent character field set.
#[derive(Clone, PartialEq, prost::Message)]
pub struct CharacterRecord {
    #[prost(int64, tag = "1")]
    pub id: i64,
    #[prost(int64, tag = "2")]
    pub account_id: i64,
    #[prost(string, tag = "3")]
    pub name: String,
    #[prost(uint32, tag = "4")]
    pub class_id: u32,
    #[prost(uint32, tag = "5")]
    pub level: u32,
    #[prost(int64, tag = "6")]
    pub xp: i64,
    #[prost(int32, tag = "7")]
    pub hp: i32,
    #[prost(int32, tag = "8")]
    pub mp: i32,
    #[prost(int32, tag = "9")]
    pub max_hp: i32,
    #[prost(int32, tag = "10")]
    pub max_mp: i32,
    #[prost(uint32, tag = "11")]
    pub strength: u32,
    #[prost(uint32, tag = "12")]
    pub stamina: u32,
    #[prost(uint32, tag = "13")]
    pub dexterity: u32,
    #[prost(uint32, tag = "14")]
    pub intellect: u32,
    #[prost(uint32, tag = "15")]
    pub stat_points: u32,
    #[prost(uint32, tag = "16")]
    pub map_id: u32,
    #[prost(float, tag = "17")]
    pub x: f32,
    #[prost(float, tag = "18")]
    pub y: f32,
    #[prost(float, tag = "19")]
    pub z: f32,
    #[prost(int64, tag = "20")]
    pub gold: i64,
    #[prost(int64, tag = "21")]
    pub play_time: i64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CharacterGetByAccountRequest {
    #[prost(int64, tag = "1")]
    pub account_id: i64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CharacterListResponse {
    #[prost(message, repeated, tag = "1")]
    pub characters: Vec<CharacterRecord>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CharacterGetRequest {
    #[prost(int64, tag = "1")]
    pub character_id: i64,
    #[prost(int64, tag = "2")]
    pub account_id: i64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CharacterGetResponse {
    #[prost(message, optional, tag = "1")]
    pub character: Option<CharacterRecord>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CharacterCreateRpcRequest {
    #[prost(int64, tag = "1")]
    pub account_id: i64,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(uint32, tag = "3")]
    pub class_id: u32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CharacterCreateRpcResponse {
    #[prost(bool, tag = "1")]
    pub success: bool,
    #[prost(bool, tag = "2")]
    pub duplicate_name: bool,
    #[prost(string, tag = "3")]
    pub message: String,
    #[prost(message, optional, tag = "4")]
    pub character: Option<CharacterRecord>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CharacterSaveRequest {
    #[prost(message, optional, tag = "1")]
    pub character: Option<CharacterRecord>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CharacterDeleteRequest {
    #[prost(int64, tag = "1")]
    pub character_id: i64,
    #[prost(int64, tag = "2")]
    pub account_id: i64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SkillRecord {
    #[prost(uint32, tag = "1")]
    pub skill_id: u32,
    #[prost(uint32, tag = "2")]
    pub level: u32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CharacterGetSkillsRequest {
    #[prost(int64, tag = "1")]
    pub character_id: i64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CharacterSkillsResponse {
    #[prost(message, repeated, tag = "1")]
    pub skills: Vec<SkillRecord>,
}

// ---------------------------------------------------------------------------
// DataService RPC: inventory
// ---------------------------------------------------------------------------

#[derive(Clone, PartialEq, prost::Message)]
pub struct ItemStack {
    #[prost(uint32, tag = "1")]
    pub slot: u32,
    #[prost(uint32, tag = "2")]
    pub item_id: u32,
    #[prost(uint32, tag = "3")]
    pub quantity: u32,
    #[prost(bool, tag = "4")]
    pub equipped: bool,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct InventoryGetRequest {
    #[prost(int64, tag = "1")]
    pub character_id: i64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct InventoryResponse {
    #[prost(message, repeated, tag = "1")]
    pub items: Vec<ItemStack>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ItemMoveRpcRequest {
    #[prost(int64, tag = "1")]
    pub character_id: i64,
    #[prost(uint32, tag = "2")]
    pub from_slot: u32,
    #[prost(uint32, tag = "3")]
    pub to_slot: u32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ItemAddRequest {
    #[prost(int64, tag = "1")]
    pub character_id: i64,
    #[prost(uint32, tag = "2")]
    pub item_id: u32,
    #[prost(uint32, tag = "3")]
    pub quantity: u32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ItemRemoveRequest {
    #[prost(int64, tag = "1")]
    pub character_id: i64,
    #[prost(uint32, tag = "2")]
    pub slot: u32,
    #[prost(uint32, tag = "3")]
    pub quantity: u32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ItemEquipRequest {
    #[prost(int64, tag = "1")]
    pub character_id: i64,
    #[prost(uint32, tag = "2")]
    pub slot: u32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ItemUnequipRequest {
    #[prost(int64, tag = "1")]
    pub character_id: i64,
    #[prost(uint32, tag = "2")]
    pub slot: u32,
}

// ---------------------------------------------------------------------------
// DataService RPC: static game data
// ---------------------------------------------------------------------------

#[derive(Clone, PartialEq, prost::Message)]
pub struct GameDataRequest {}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ItemDef {
    #[prost(uint32, tag = "1")]
    pub id: u32,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(uint32, tag = "3")]
    pub kind: u32,
    #[prost(uint32, tag = "4")]
    pub stack_size: u32,
    #[prost(int32, tag = "5")]
    pub attack_bonus: i32,
    #[prost(int32, tag = "6")]
    pub defense_bonus: i32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ItemDefsResponse {
    #[prost(message, repeated, tag = "1")]
    pub items: Vec<ItemDef>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct MonsterDef {
    #[prost(uint32, tag = "1")]
    pub id: u32,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(uint32, tag = "3")]
    pub level: u32,
    #[prost(int32, tag = "4")]
    pub max_hp: i32,
    #[prost(int32, tag = "5")]
    pub attack: i32,
    #[prost(int32, tag = "6")]
    pub defense: i32,
    #[prost(int64, tag = "7")]
    pub xp_reward: i64,
    #[prost(float, tag = "8")]
    pub aggro_range: f32,
    #[prost(float, tag = "9")]
    pub attack_range: f32,
    #[prost(uint64, tag = "10")]
    pub attack_speed_ms: u64,
    #[prost(float, tag = "11")]
    pub move_speed: f32,
    #[prost(uint64, tag = "12")]
    pub respawn_ms: u64,
    #[prost(float, tag = "13")]
    pub leash_distance: f32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct MonsterDefsResponse {
    #[prost(message, repeated, tag = "1")]
    pub monsters: Vec<MonsterDef>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SpawnRecord {
    #[prost(uint32, tag = "1")]
    pub monster_id: u32,
    #[prost(uint32, tag = "2")]
    pub zone_id: u32,
    #[prost(float, tag = "3")]
    pub x: f32,
    #[prost(float, tag = "4")]
    pub y: f32,
    #[prost(float, tag = "5")]
    pub z: f32,
    #[prost(float, tag = "6")]
    pub radius: f32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SpawnsResponse {
    #[prost(message, repeated, tag = "1")]
    pub spawns: Vec<SpawnRecord>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SkillDef {
    #[prost(uint32, tag = "1")]
    pub id: u32,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(uint32, tag = "3")]
    pub class_id: u32,
    #[prost(int32, tag = "4")]
    pub base_damage: i32,
    #[prost(int32, tag = "5")]
    pub damage_per_level: i32,
    #[prost(uint64, tag = "6")]
    pub cooldown_ms: u64,
    #[prost(uint32, tag = "7")]
    pub mp_cost: u32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SkillDefsResponse {
    #[prost(message, repeated, tag = "1")]
    pub skills: Vec<SkillDef>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct LootTableEntry {
    #[prost(uint32, tag = "1")]
    pub monster_id: u32,
    #[prost(uint32, tag = "2")]
    pub item_id: u32,
    #[prost(float, tag = "3")]
    pub chance: f32,
    #[prost(uint32, tag = "4")]
    pub min_quantity: u32,
    #[prost(uint32, tag = "5")]
    pub max_quantity: u32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct LootTablesResponse {
    #[prost(message, repeated, tag = "1")]
    pub entries: Vec<LootTableEntry>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct RpcErrorResponse {
    #[prost(uint32, tag = "1")]
    pub code: u32,
    #[prost(string, tag = "2")]
    pub message: String,
}
