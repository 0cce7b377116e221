// Database enum types shared by the Postgres store and the in-memory store.
// Column types are created in migrations/0001_market_core.sql

pub mod types {
    use serde::{Deserialize, Serialize};
    use std::fmt;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
    #[sqlx(type_name = "order_side", rename_all = "lowercase")]
    #[serde(rename_all = "lowercase")]
    pub enum OrderSide {
        Buy,
        Sell,
    }

    impl OrderSide {
        pub fn as_str(&self) -> &'static str {
            match self {
                OrderSide::Buy => "buy",
                OrderSide::Sell => "sell",
            }
        }
    }

    /// Order lifecycle: `Created -> Matched -> Completed`, or `Created -> Cancelled`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
    #[sqlx(type_name = "order_status", rename_all = "lowercase")]
    pub enum OrderStatus {
        Created,
        Matched,
        Cancelled,
        Completed,
    }

    impl OrderStatus {
        pub fn as_str(&self) -> &'static str {
            match self {
                OrderStatus::Created => "created",
                OrderStatus::Matched => "matched",
                OrderStatus::Cancelled => "cancelled",
                OrderStatus::Completed => "completed",
            }
        }

        /// Whether `self -> to` is an edge of the order state machine.
        pub fn can_transition_to(&self, to: OrderStatus) -> bool {
            matches!(
                (self, to),
                (OrderStatus::Created, OrderStatus::Matched)
                    | (OrderStatus::Created, OrderStatus::Cancelled)
                    | (OrderStatus::Matched, OrderStatus::Completed)
            )
        }
    }

    impl fmt::Display for OrderStatus {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.as_str())
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
    #[sqlx(type_name = "trade_status", rename_all = "lowercase")]
    pub enum TradeStatus {
        Pending,
        Confirmed,
        Failed,
    }

    impl fmt::Display for TradeStatus {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                TradeStatus::Pending => write!(f, "pending"),
                TradeStatus::Confirmed => write!(f, "confirmed"),
                TradeStatus::Failed => write!(f, "failed"),
            }
        }
    }
}
