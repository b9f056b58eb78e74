/// Total number of input slots a bundle exposes to a program.
pub const INPUT_SLOTS: usize = 64;

/// First constant buffer slot (`b0`).
pub const CBUFFER0_REGISTER: u32 = 0;
pub const CBUFFER_TOTAL: u32 = 8;

/// First system value/argument slot (`v0`).
pub const INPUT0_REGISTER: u32 = 8;
pub const INPUT_TOTAL: u32 = 8;

/// First read-only resource slot (`t0`).
pub const SRV0_REGISTER: u32 = 16;
pub const SRV_TOTAL: u32 = 16;

/// First unordered access slot (`u0`).
pub const UAV0_REGISTER: u32 = 32;
pub const UAV_TOTAL: u32 = 32;

/// Number of 32 bit words in a vm register file.
pub const REGISTER_COUNT: usize = 2048;

/// Compute shader system values, in the order they occupy the `v#` slots.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum SystemValue {
    /// `uint3 SV_GroupID`
    GroupId,
    /// `uint SV_GroupIndex`
    GroupIndex,
    /// `uint3 SV_GroupThreadID`
    GroupThreadId,
    /// `uint3 SV_DispatchThreadID`
    DispatchThreadId,
}

impl SystemValue {
    pub const ALL: [SystemValue; 4] = [
        SystemValue::GroupId,
        SystemValue::GroupIndex,
        SystemValue::GroupThreadId,
        SystemValue::DispatchThreadId,
    ];

    /// Input slot the value is bound to.
    pub const fn slot(self) -> u32 {
        INPUT0_REGISTER
            + match self {
                SystemValue::GroupId => 0,
                SystemValue::GroupIndex => 1,
                SystemValue::GroupThreadId => 2,
                SystemValue::DispatchThreadId => 3,
            }
    }

    /// Number of 32 bit components.
    pub const fn components(self) -> u32 {
        match self {
            SystemValue::GroupIndex => 1,
            _ => 3,
        }
    }

    pub fn semantic(self) -> &'static str {
        match self {
            SystemValue::GroupId => "SV_GroupID",
            SystemValue::GroupIndex => "SV_GroupIndex",
            SystemValue::GroupThreadId => "SV_GroupThreadID",
            SystemValue::DispatchThreadId => "SV_DispatchThreadID",
        }
    }
}

/// Kind of an input slot, derived from its position in the input table.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum SlotKind {
    ConstantBuffer(u32),
    Input(u32),
    Resource(u32),
    Uav(u32),
}

impl SlotKind {
    pub fn of(slot: u32) -> Option<Self> {
        match slot {
            s if (CBUFFER0_REGISTER..CBUFFER0_REGISTER + CBUFFER_TOTAL).contains(&s) => {
                Some(SlotKind::ConstantBuffer(s - CBUFFER0_REGISTER))
            }
            s if (INPUT0_REGISTER..INPUT0_REGISTER + INPUT_TOTAL).contains(&s) => Some(SlotKind::Input(s - INPUT0_REGISTER)),
            s if (SRV0_REGISTER..SRV0_REGISTER + SRV_TOTAL).contains(&s) => Some(SlotKind::Resource(s - SRV0_REGISTER)),
            s if (UAV0_REGISTER..UAV0_REGISTER + UAV_TOTAL).contains(&s) => Some(SlotKind::Uav(s - UAV0_REGISTER)),
            _ => None,
        }
    }
}

/// Shader-like register name of an input slot (`b0`, `v3`, `t1`, `u2`).
pub fn slot_name(slot: u32) -> String {
    match SlotKind::of(slot) {
        Some(SlotKind::ConstantBuffer(i)) => format!("b{i}"),
        Some(SlotKind::Input(i)) => format!("v{i}"),
        Some(SlotKind::Resource(i)) => format!("t{i}"),
        Some(SlotKind::Uav(i)) => format!("u{i}"),
        None => format!("[ invalid slot | {slot} ]"),
    }
}

/// A three dimensional extent, used both for the number of thread groups
/// and for the thread group size.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct Dim3 {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl Dim3 {
    pub const ONE: Dim3 = Dim3 { x: 1, y: 1, z: 1 };

    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    /// Total number of elements (`x * y * z`).
    pub fn volume(&self) -> u64 {
        self.x as u64 * self.y as u64 * self.z as u64
    }

    pub fn is_empty(&self) -> bool {
        self.volume() == 0
    }
}

impl Default for Dim3 {
    fn default() -> Self {
        Self::ONE
    }
}

impl From<[u32; 3]> for Dim3 {
    fn from(value: [u32; 3]) -> Self {
        Self {
            x: value[0],
            y: value[1],
            z: value[2],
        }
    }
}

impl From<u32> for Dim3 {
    fn from(value: u32) -> Self {
        Self { x: value, y: 1, z: 1 }
    }
}

impl From<Dim3> for [u32; 3] {
    fn from(value: Dim3) -> Self {
        [value.x, value.y, value.z]
    }
}
