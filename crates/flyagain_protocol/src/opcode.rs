//! The canonical opcode table.
//!
//! Gateway opcodes live below 0x1000; DataService RPC opcodes use the
//! 0x1Fxx block (odd = request, even = response).

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Opcode {
    LoginRequest = 0x0001,
    LoginResponse = 0x0002,
    CharacterSelect = 0x0003,
    EnterWorld = 0x0004,
    CharacterCreate = 0x0005,
    RegisterRequest = 0x0006,
    RegisterResponse = 0x0007,
    MovementInput = 0x0101,
    SelectTarget = 0x0201,
    EntitySync = 0x0301,
    MoveItem = 0x0401,
    ChatMessage = 0x0501,
    Heartbeat = 0x0601,
    ZoneData = 0x0701,
    ChannelSwitch = 0x0702,
    ChannelList = 0x0703,
    PositionCorrection = 0x07FE,
    ErrorResponse = 0x07FF,

    AccountGetByUsername = 0x1F01,
    AccountGetByUsernameResp = 0x1F02,
    AccountGetById = 0x1F03,
    AccountGetByIdResp = 0x1F04,
    AccountCreate = 0x1F05,
    AccountCreateResp = 0x1F06,
    AccountUpdateLastLogin = 0x1F07,
    AccountUpdateLastLoginResp = 0x1F08,
    AccountCheckBan = 0x1F09,
    AccountCheckBanResp = 0x1F0A,
    CharacterGetByAccount = 0x1F11,
    CharacterGetByAccountResp = 0x1F12,
    CharacterGet = 0x1F13,
    CharacterGetResp = 0x1F14,
    CharacterCreateRpc = 0x1F15,
    CharacterCreateRpcResp = 0x1F16,
    CharacterSave = 0x1F17,
    CharacterSaveResp = 0x1F18,
    CharacterDelete = 0x1F19,
    CharacterDeleteResp = 0x1F1A,
    CharacterGetSkills = 0x1F1B,
    CharacterGetSkillsResp = 0x1F1C,
    InventoryGet = 0x1F21,
    InventoryGetResp = 0x1F22,
    EquipmentGet = 0x1F23,
    EquipmentGetResp = 0x1F24,
    ItemMove = 0x1F25,
    ItemMoveResp = 0x1F26,
    ItemAdd = 0x1F27,
    ItemAddResp = 0x1F28,
    ItemRemove = 0x1F29,
    ItemRemoveResp = 0x1F2A,
    ItemEquip = 0x1F2B,
    ItemEquipResp = 0x1F2C,
    ItemUnequip = 0x1F2D,
    ItemUnequipResp = 0x1F2E,
    GameDataGetItems = 0x1F31,
    GameDataGetItemsResp = 0x1F32,
    GameDataGetMonsters = 0x1F33,
    GameDataGetMonstersResp = 0x1F34,
    GameDataGetSpawns = 0x1F35,
    GameDataGetSpawnsResp = 0x1F36,
    GameDataGetSkills = 0x1F37,
    GameDataGetSkillsResp = 0x1F38,
    GameDataGetLootTables = 0x1F39,
    GameDataGetLootTablesResp = 0x1F3A,
    RpcError = 0x1FFF,
}

impl Opcode {
    pub fn from_u16(raw: u16) -> Option<Opcode> {
        use Opcode::*;
        Some(match raw {
            0x0001 => LoginRequest,
            0x0002 => LoginResponse,
            0x0003 => CharacterSelect,
            0x0004 => EnterWorld,
            0x0005 => CharacterCreate,
            0x0006 => RegisterRequest,
            0x0007 => RegisterResponse,
            0x0101 => MovementInput,
            0x0201 => SelectTarget,
            0x0301 => EntitySync,
            0x0401 => MoveItem,
            0x0501 => ChatMessage,
            0x0601 => Heartbeat,
            0x0701 => ZoneData,
            0x0702 => ChannelSwitch,
            0x0703 => ChannelList,
            0x07FE => PositionCorrection,
            0x07FF => ErrorResponse,
            0x1F01 => AccountGetByUsername,
            0x1F02 => AccountGetByUsernameResp,
            0x1F03 => AccountGetById,
            0x1F04 => AccountGetByIdResp,
            0x1F05 => AccountCreate,
            0x1F06 => AccountCreateResp,
            0x1F07 => AccountUpdateLastLogin,
            0x1F08 => AccountUpdateLastLoginResp,
            0x1F09 => AccountCheckBan,
            0x1F0A => AccountCheckBanResp,
            0x1F11 => CharacterGetByAccount,
            0x1F12 => CharacterGetByAccountResp,
            0x1F13 => CharacterGet,
            0x1F14 => CharacterGetResp,
            0x1F15 => CharacterCreateRpc,
            0x1F16 => CharacterCreateRpcResp,
            0x1F17 => CharacterSave,
            0x1F18 => CharacterSaveResp,
            0x1F19 => CharacterDelete,
            0x1F1A => CharacterDeleteResp,
            0x1F1B => CharacterGetSkills,
            0x1F1C => CharacterGetSkillsResp,
            0x1F21 => InventoryGet,
            0x1F22 => InventoryGetResp,
            0x1F23 => EquipmentGet,
            0x1F24 => EquipmentGetResp,
            0x1F25 => ItemMove,
            0x1F26 => ItemMoveResp,
            0x1F27 => ItemAdd,
            0x1F28 => ItemAddResp,
            0x1F29 => ItemRemove,
            0x1F2A => ItemRemoveResp,
            0x1F2B => ItemEquip,
            0x1F2C => ItemEquipResp,
            0x1F2D => ItemUnequip,
            0x1F2E => ItemUnequipResp,
            0x1F31 => GameDataGetItems,
            0x1F32 => GameDataGetItemsResp,
            0x1F33 => GameDataGetMonsters,
            0x1F34 => GameDataGetMonstersResp,
            0x1F35 => GameDataGetSpawns,
            0x1F36 => GameDataGetSpawnsResp,
            0x1F37 => GameDataGetSkills,
            0x1F38 => GameDataGetSkillsResp,
            0x1F39 => GameDataGetLootTables,
            0x1F3A => GameDataGetLootTablesResp,
            0x1FFF => RpcError,
            _ => return None,
        })
    }

    /// The matching response opcode for an RPC request opcode.
    pub fn rpc_response(self) -> Option<Opcode> {
        let raw = self as u16;
        if (0x1F00..0x1FFF).contains(&raw) && raw % 2 == 1 {
            Opcode::from_u16(raw + 1)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_u16_roundtrip() {
        for raw in 0u16..=0x2000 {
            if let Some(op) = Opcode::from_u16(raw) {
                assert_eq!(op as u16, raw);
            }
        }
    }

    #[test]
    fn test_unknown_opcode_is_none() {
        assert_eq!(Opcode::from_u16(0x0999), None);
        assert_eq!(Opcode::from_u16(0xFFFF), None);
    }

    #[test]
    fn test_rpc_response_pairing() {
        assert_eq!(
            Opcode::AccountGetByUsername.rpc_response(),
            Some(Opcode::AccountGetByUsernameResp)
        );
        assert_eq!(
            Opcode::GameDataGetLootTables.rpc_response(),
            Some(Opcode::GameDataGetLootTablesResp)
        );
        assert_eq!(Opcode::LoginRequest.rpc_response(), None);
        assert_eq!(Opcode::AccountGetByUsernameResp.rpc_response(), None);
    }
}
