//! Lifecycle states for intents, payments, refunds, webhook events and the
//! payment-facing fields of an order.
//!
//! Every status is persisted as its wire string (`as_str`) and parsed back
//! with `FromStr`; unknown strings are a data error, not a panic.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} status: {value:?}")]
pub struct ParseStatusError {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $name:ident ($label:literal) {
            $($variant:ident => $wire:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $wire)]
                $variant,
            )+
        }

        impl $name {
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $wire,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ParseStatusError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($wire => Ok(Self::$variant),)+
                    other => Err(ParseStatusError {
                        kind: $label,
                        value: other.to_owned(),
                    }),
                }
            }
        }
    };
}

wire_enum!(
    /// Status of a payment intent.
    IntentStatus ("intent") {
        RequiresConfirmation => "requires_confirmation",
        Processing => "processing",
        Succeeded => "succeeded",
        Failed => "failed",
        RequiresAction => "requires_action",
    }
);

impl IntentStatus {
    /// Statuses in which an intent is still the order's live attempt.
    pub const OPEN: [IntentStatus; 3] = [
        Self::RequiresConfirmation,
        Self::Processing,
        Self::RequiresAction,
    ];

    /// Whether an event reporting `next` should change an intent that is
    /// currently `self`.
    ///
    /// `succeeded` never changes. A `failed` intent only moves to
    /// `succeeded` (the provider captured funds after all) or records a new
    /// failure. Re-reporting the current open status is a no-op.
    pub fn can_transition_to(self, next: IntentStatus) -> bool {
        match self {
            Self::Succeeded => false,
            Self::Failed => matches!(next, Self::Succeeded | Self::Failed),
            current => current != next,
        }
    }
}

wire_enum!(
    /// Status of a settled payment.
    PaymentStatus ("payment") {
        Succeeded => "succeeded",
        PartiallyRefunded => "partially_refunded",
        Refunded => "refunded",
    }
);

wire_enum!(
    /// Status of a refund request.
    RefundStatus ("refund") {
        Requested => "requested",
        Processing => "processing",
        Succeeded => "succeeded",
        Failed => "failed",
    }
);

impl RefundStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

wire_enum!(
    /// Processing state of a stored webhook event.
    WebhookEventStatus ("webhook event") {
        Received => "received",
        Processed => "processed",
        Failed => "failed",
    }
);

wire_enum!(
    /// Order lifecycle status. The engine only moves `PENDING_PAYMENT` forward;
    /// everything else belongs to the booking side.
    OrderStatus ("order") {
        PendingPayment => "PENDING_PAYMENT",
        PendingHostConfirm => "PENDING_HOST_CONFIRM",
        Confirmed => "CONFIRMED",
        InProgress => "IN_PROGRESS",
        Completed => "COMPLETED",
        Cancelled => "CANCELLED",
    }
);

impl OrderStatus {
    /// Status an order moves to once its payment settles, if it moves at all.
    pub fn after_payment(self) -> Option<OrderStatus> {
        match self {
            Self::PendingPayment => Some(Self::PendingHostConfirm),
            _ => None,
        }
    }
}

wire_enum!(
    OrderPaymentStatus ("order payment") {
        Unpaid => "UNPAID",
        Paid => "PAID",
        Refunded => "REFUNDED",
    }
);

impl OrderPaymentStatus {
    /// Only an unpaid order takes a settlement.
    pub fn accepts_settlement(self) -> bool {
        matches!(self, Self::Unpaid)
    }
}

wire_enum!(
    /// What a payment attempt row audits.
    AttemptKind ("attempt") {
        Confirm => "confirm",
        Refund => "refund",
        Expire => "expire",
        Webhook => "webhook",
    }
);
