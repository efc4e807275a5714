//! Type-safe cache key builders

use std::fmt;

pub const VERSION: &str = "v1";

pub mod auth {
    use super::*;

    pub const NAMESPACE: &str = "auth";

    /// Client-credentials token for calls between services
    #[derive(Debug, Clone)]
    pub struct ServiceTokenKey {
        pub client_id: String,
    }

    impl ServiceTokenKey {
        pub fn new(client_id: impl Into<String>) -> Self {
            Self {
                client_id: client_id.into(),
            }
        }
    }

    impl fmt::Display for ServiceTokenKey {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(
                f,
                "{}:{}:service_token:{}",
                VERSION, NAMESPACE, self.client_id
            )
        }
    }
}

pub mod payment {
    use super::*;
    use uuid::Uuid;

    pub const NAMESPACE: &str = "payment";

    #[derive(Debug, Clone)]
    pub struct PaymentKey {
        pub payment_id: Uuid,
    }

    impl PaymentKey {
        pub fn new(payment_id: Uuid) -> Self {
            Self { payment_id }
        }
    }

    impl fmt::Display for PaymentKey {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}:{}:id:{}", VERSION, NAMESPACE, self.payment_id)
        }
    }

    /// Most recent payment for an order, any provider
    #[derive(Debug, Clone)]
    pub struct LatestForOrderKey {
        pub order_id: i64,
    }

    impl LatestForOrderKey {
        pub fn new(order_id: i64) -> Self {
            Self { order_id }
        }
    }

    impl fmt::Display for LatestForOrderKey {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}:{}:order:{}", VERSION, NAMESPACE, self.order_id)
        }
    }
}

pub mod order {
    use super::*;
    use uuid::Uuid;

    pub const NAMESPACE: &str = "order";

    #[derive(Debug, Clone)]
    pub struct OrderKey {
        pub order_id: i64,
    }

    impl OrderKey {
        pub fn new(order_id: i64) -> Self {
            Self { order_id }
        }
    }

    impl fmt::Display for OrderKey {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}:{}:id:{}", VERSION, NAMESPACE, self.order_id)
        }
    }

    #[derive(Debug, Clone)]
    pub struct UserOrdersKey {
        pub user_id: Uuid,
    }

    impl UserOrdersKey {
        pub fn new(user_id: Uuid) -> Self {
            Self { user_id }
        }
    }

    impl fmt::Display for UserOrdersKey {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}:{}:user:{}", VERSION, NAMESPACE, self.user_id)
        }
    }

    /// List of orders sharing one status
    #[derive(Debug, Clone)]
    pub struct StatusBucketKey {
        pub status: String,
    }

    impl StatusBucketKey {
        pub fn new(status: impl Into<String>) -> Self {
            Self {
                status: status.into(),
            }
        }
    }

    impl fmt::Display for StatusBucketKey {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}:{}:status:{}", VERSION, NAMESPACE, self.status)
        }
    }
}
