//! Public types for the touch resolver.

use crate::touch::{Consistency, QueueStage};

/// One store/consistency combination consulted by the cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    /// Durable store read at the given consistency
    Database(Consistency),
    /// In-flight queue list for the given stage
    Queue(QueueStage),
}

impl Tier {
    /// Stable label for logs and metrics.
    pub fn name(&self) -> &'static str {
        match self {
            Tier::Database(Consistency::None) => "db_none",
            Tier::Database(Consistency::Weak) => "db_weak",
            Tier::Database(Consistency::Strong) => "db_strong",
            Tier::Queue(QueueStage::PendingSend) => "queue_pending_send",
            Tier::Queue(QueueStage::PendingPersist) => "queue_pending_persist",
            Tier::Queue(QueueStage::InPersist) => "queue_in_persist",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// The order tiers are consulted in.
///
/// Cheap replica reads first (most touches are already persisted), then the
/// queues in the order a touch travels them, then the primary. Only the last
/// step is load-bearing for correctness; it always runs if reached and its
/// answer is final.
pub const CASCADE: [Tier; 6] = [
    Tier::Database(Consistency::None),
    Tier::Database(Consistency::Weak),
    Tier::Queue(QueueStage::PendingSend),
    Tier::Queue(QueueStage::PendingPersist),
    Tier::Queue(QueueStage::InPersist),
    Tier::Database(Consistency::Strong),
];

/// Outcome of a cascade run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Sub of the owning user, if any tier knew it
    pub user_sub: Option<String>,
    /// The tier that answered; `None` on a miss
    pub tier: Option<Tier>,
    /// How many tiers were queried, including the answering one
    pub tiers_consulted: usize,
}

impl Resolution {
    pub fn is_found(&self) -> bool {
        self.user_sub.is_some()
    }
}
