use crate::credits::Credits;

/// A purchasable bundle of credits, identified by the `pack_id` carried in checkout
/// session metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreditPack {
    pub id: &'static str,
    pub credits: i64,
}

impl CreditPack {
    pub const fn credits(&self) -> Credits {
        Credits::from_whole(self.credits)
    }
}

pub const CREDIT_PACKS: &[CreditPack] = &[
    CreditPack {
        id: "basic",
        credits: 80,
    },
    CreditPack {
        id: "popular",
        credits: 250,
    },
    CreditPack {
        id: "pro",
        credits: 500,
    },
];

pub fn find_pack(id: &str) -> Option<&'static CreditPack> {
    CREDIT_PACKS.iter().find(|p| p.id == id)
}
