/// Mouse skeleton keypoint indexes, in the order stored in pose files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(usize)]
pub enum KeypointIndex {
    Nose = 0,
    LeftEar = 1,
    RightEar = 2,
    BaseNeck = 3,
    LeftFrontPaw = 4,
    RightFrontPaw = 5,
    CenterSpine = 6,
    LeftRearPaw = 7,
    RightRearPaw = 8,
    BaseTail = 9,
    MidTail = 10,
    TipTail = 11,
}

impl KeypointIndex {
    pub const COUNT: usize = 12;

    /// Keypoints considered when deciding whether an identity is present.
    /// The two distal tail points are excluded.
    pub const CORE_COUNT: usize = Self::COUNT - 2;

    pub const ALL: [KeypointIndex; Self::COUNT] = [
        Self::Nose,
        Self::LeftEar,
        Self::RightEar,
        Self::BaseNeck,
        Self::LeftFrontPaw,
        Self::RightFrontPaw,
        Self::CenterSpine,
        Self::LeftRearPaw,
        Self::RightRearPaw,
        Self::BaseTail,
        Self::MidTail,
        Self::TipTail,
    ];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Name used in feature column labels
    pub fn name(self) -> &'static str {
        match self {
            Self::Nose => "NOSE",
            Self::LeftEar => "LEFT_EAR",
            Self::RightEar => "RIGHT_EAR",
            Self::BaseNeck => "BASE_NECK",
            Self::LeftFrontPaw => "LEFT_FRONT_PAW",
            Self::RightFrontPaw => "RIGHT_FRONT_PAW",
            Self::CenterSpine => "CENTER_SPINE",
            Self::LeftRearPaw => "LEFT_REAR_PAW",
            Self::RightRearPaw => "RIGHT_REAR_PAW",
            Self::BaseTail => "BASE_TAIL",
            Self::MidTail => "MID_TAIL",
            Self::TipTail => "TIP_TAIL",
        }
    }
}
