//! nl802154 and nlctrl protocol constants and attribute schemas, as published
//! in `linux/nl802154.h` and `linux/genetlink.h`.

use genl_transport::{AttrKind, Schema};

pub const FAMILY_NAME: &str = "nl802154";
pub const CTRL_FAMILY_NAME: &str = "nlctrl";

/// Fixed id of the control family, used to bootstrap every lookup.
pub const GENL_ID_CTRL: u16 = 0x10;
pub const CTRL_CMD_NEWFAMILY: u8 = 1;
pub const CTRL_CMD_GETFAMILY: u8 = 3;
pub const CTRL_ATTR_FAMILY_ID: u16 = 1;
pub const CTRL_ATTR_FAMILY_NAME: u16 = 2;
pub const CTRL_ATTR_VERSION: u16 = 3;
pub const CTRL_ATTR_HDRSIZE: u16 = 4;
pub const CTRL_ATTR_MAXATTR: u16 = 5;
pub const CTRL_ATTR_OPS: u16 = 6;
pub const CTRL_ATTR_MCAST_GROUPS: u16 = 7;

pub const CMD_GET_WPAN_PHY: u8 = 1;
pub const CMD_NEW_WPAN_PHY: u8 = 3;
pub const CMD_GET_INTERFACE: u8 = 5;
pub const CMD_NEW_INTERFACE: u8 = 7;

pub const ATTR_WPAN_PHY: u16 = 1;
pub const ATTR_WPAN_PHY_NAME: u16 = 2;
pub const ATTR_IFINDEX: u16 = 3;
pub const ATTR_IFNAME: u16 = 4;
pub const ATTR_IFTYPE: u16 = 5;
pub const ATTR_WPAN_DEV: u16 = 6;
pub const ATTR_PAGE: u16 = 7;
pub const ATTR_CHANNEL: u16 = 8;
pub const ATTR_PAN_ID: u16 = 9;
pub const ATTR_SHORT_ADDR: u16 = 10;
pub const ATTR_TX_POWER: u16 = 11;
pub const ATTR_CCA_MODE: u16 = 12;
pub const ATTR_CCA_OPT: u16 = 13;
pub const ATTR_CCA_ED_LEVEL: u16 = 14;
pub const ATTR_MAX_FRAME_RETRIES: u16 = 15;
pub const ATTR_MAX_BE: u16 = 16;
pub const ATTR_MIN_BE: u16 = 17;
pub const ATTR_MAX_CSMA_BACKOFFS: u16 = 18;
pub const ATTR_LBT_MODE: u16 = 19;
pub const ATTR_GENERATION: u16 = 20;
pub const ATTR_CHANNELS_SUPPORTED: u16 = 21;
pub const ATTR_SUPPORTED_CHANNEL: u16 = 22;
pub const ATTR_EXTENDED_ADDR: u16 = 23;
pub const ATTR_WPAN_PHY_CAPS: u16 = 24;
pub const ATTR_SUPPORTED_COMMANDS: u16 = 25;
pub const ATTR_ACKREQ_DEFAULT: u16 = 26;
pub const ATTR_PAD: u16 = 27;

pub const CAP_ATTR_IFTYPES: u16 = 1;
pub const CAP_ATTR_CHANNELS: u16 = 2;
pub const CAP_ATTR_TX_POWERS: u16 = 3;
pub const CAP_ATTR_CCA_ED_LEVELS: u16 = 4;
pub const CAP_ATTR_CCA_MODES: u16 = 5;
pub const CAP_ATTR_CCA_OPTS: u16 = 6;
pub const CAP_ATTR_MIN_MINBE: u16 = 7;
pub const CAP_ATTR_MAX_MINBE: u16 = 8;
pub const CAP_ATTR_MIN_MAXBE: u16 = 9;
pub const CAP_ATTR_MAX_MAXBE: u16 = 10;
pub const CAP_ATTR_MIN_CSMA_BACKOFFS: u16 = 11;
pub const CAP_ATTR_MAX_CSMA_BACKOFFS: u16 = 12;
pub const CAP_ATTR_MIN_FRAME_RETRIES: u16 = 13;
pub const CAP_ATTR_MAX_FRAME_RETRIES: u16 = 14;
pub const CAP_ATTR_LBT: u16 = 15;

pub const IFTYPE_NODE: u32 = 0;
pub const IFTYPE_MONITOR: u32 = 1;
pub const IFTYPE_COORD: u32 = 2;
pub const IFTYPE_UNSPEC: u32 = u32::MAX;

pub const CCA_ENERGY: u32 = 1;
pub const CCA_CARRIER: u32 = 2;
pub const CCA_ENERGY_CARRIER: u32 = 3;
pub const CCA_ALOHA: u32 = 4;
pub const CCA_UWB_SHR: u32 = 5;
pub const CCA_UWB_MULTIPLEXED: u32 = 6;

pub const CCA_OPT_ENERGY_CARRIER_AND: u32 = 0;
pub const CCA_OPT_ENERGY_CARRIER_OR: u32 = 1;

static FLAGS: Schema = Schema::array("flags", AttrKind::Flag);
static LEVELS: Schema = Schema::array("levels", AttrKind::S32);
static PAGE_CHANNELS: Schema = Schema::array("page channels", AttrKind::Nested(&FLAGS));

/// Contents of `NL802154_ATTR_WPAN_PHY_CAPS`.
pub static CAPS: Schema = Schema {
    name: "wpan phy caps",
    fields: &[
        (CAP_ATTR_IFTYPES, AttrKind::Nested(&FLAGS)),
        (CAP_ATTR_CHANNELS, AttrKind::Nested(&PAGE_CHANNELS)),
        (CAP_ATTR_TX_POWERS, AttrKind::Nested(&LEVELS)),
        (CAP_ATTR_CCA_ED_LEVELS, AttrKind::Nested(&LEVELS)),
        (CAP_ATTR_CCA_MODES, AttrKind::Nested(&FLAGS)),
        (CAP_ATTR_CCA_OPTS, AttrKind::Nested(&FLAGS)),
        (CAP_ATTR_MIN_MINBE, AttrKind::U8),
        (CAP_ATTR_MAX_MINBE, AttrKind::U8),
        (CAP_ATTR_MIN_MAXBE, AttrKind::U8),
        (CAP_ATTR_MAX_MAXBE, AttrKind::U8),
        (CAP_ATTR_MIN_CSMA_BACKOFFS, AttrKind::U8),
        (CAP_ATTR_MAX_CSMA_BACKOFFS, AttrKind::U8),
        (CAP_ATTR_MIN_FRAME_RETRIES, AttrKind::S8),
        (CAP_ATTR_MAX_FRAME_RETRIES, AttrKind::S8),
        (CAP_ATTR_LBT, AttrKind::U32),
    ],
    rest: None,
};

/// Top level of every nl802154 message.
pub static ATTRS: Schema = Schema {
    name: "nl802154",
    fields: &[
        (ATTR_WPAN_PHY, AttrKind::U32),
        (ATTR_WPAN_PHY_NAME, AttrKind::Str),
        (ATTR_IFINDEX, AttrKind::U32),
        (ATTR_IFNAME, AttrKind::Str),
        (ATTR_IFTYPE, AttrKind::U32),
        (ATTR_WPAN_DEV, AttrKind::U64),
        (ATTR_PAGE, AttrKind::U8),
        (ATTR_CHANNEL, AttrKind::U8),
        (ATTR_PAN_ID, AttrKind::Le16),
        (ATTR_SHORT_ADDR, AttrKind::Le16),
        (ATTR_TX_POWER, AttrKind::S32),
        (ATTR_CCA_MODE, AttrKind::U32),
        (ATTR_CCA_OPT, AttrKind::U32),
        (ATTR_CCA_ED_LEVEL, AttrKind::S32),
        (ATTR_MAX_FRAME_RETRIES, AttrKind::S8),
        (ATTR_MAX_BE, AttrKind::U8),
        (ATTR_MIN_BE, AttrKind::U8),
        (ATTR_MAX_CSMA_BACKOFFS, AttrKind::U8),
        (ATTR_LBT_MODE, AttrKind::U8),
        (ATTR_GENERATION, AttrKind::U32),
        (ATTR_SUPPORTED_CHANNEL, AttrKind::U32),
        (ATTR_EXTENDED_ADDR, AttrKind::Le64),
        (ATTR_WPAN_PHY_CAPS, AttrKind::Nested(&CAPS)),
        (ATTR_ACKREQ_DEFAULT, AttrKind::U8),
    ],
    rest: None,
};

/// Replies of `CTRL_CMD_GETFAMILY`.
pub static CTRL_ATTRS: Schema = Schema {
    name: "nlctrl",
    fields: &[
        (CTRL_ATTR_FAMILY_ID, AttrKind::U16),
        (CTRL_ATTR_FAMILY_NAME, AttrKind::Str),
        (CTRL_ATTR_VERSION, AttrKind::U32),
        (CTRL_ATTR_HDRSIZE, AttrKind::U32),
        (CTRL_ATTR_MAXATTR, AttrKind::U32),
    ],
    rest: None,
};
