//! Reversal notices.
//!
//! A reversal tells both parties what happened and where their balance
//! ended up. Each notice is audited on its own. Only the addressee can mark
//! a notice read, and read never goes back to unread.

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::debug;
use uuid::Uuid;

use super::types::{Notification, NotificationKind};
use super::Ledger;
use crate::audit::AuditFields;
use crate::error::{LedgerError, LedgerResult};

/// The text users see after a reversal.
pub fn reversal_message(amount: Decimal, actor_id: &str, new_balance: Decimal) -> String {
    format!(
        "Transaction of {amount} has been reversed by {actor_id}. Your new balance is {new_balance}"
    )
}

impl Ledger {
    /// Build and audit (but don't store) a reversal notice for `user_id`.
    pub(crate) fn reversal_notice(
        &self,
        user_id: &str,
        log_id: Uuid,
        amount: Decimal,
        actor_id: &str,
        new_balance: Decimal,
    ) -> Notification {
        let mut notification = Notification {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            log_id,
            kind: NotificationKind::TransactionReversal,
            message: reversal_message(amount, actor_id, new_balance),
            timestamp: Utc::now(),
            read: false,
            audit: AuditFields::default(),
            degraded: Vec::new(),
        };
        let outcome = self.crypto.auditor.stamp(&notification.audit_payload());
        notification.audit = outcome.fields;
        notification.degraded = outcome.degraded;
        notification
    }

    /// Notices addressed to `user_id`, newest first.
    pub fn notifications_for(
        &self,
        user_id: &str,
        unread_only: bool,
    ) -> LedgerResult<Vec<Notification>> {
        let mut notifications = self.records.notifications_for(user_id)?;
        if unread_only {
            notifications.retain(|n| !n.read);
        }
        Ok(notifications)
    }

    /// Mark one of `user_id`'s notices as read.
    ///
    /// Someone else's notice is indistinguishable from a missing one.
    /// Marking an already-read notice is a no-op.
    pub fn mark_notification_read(
        &self,
        notification_id: Uuid,
        user_id: &str,
    ) -> LedgerResult<Notification> {
        let mut notification = self
            .records
            .notification(notification_id)?
            .filter(|n| n.user_id == user_id)
            .ok_or_else(|| LedgerError::not_found("notification", notification_id))?;

        if !notification.read {
            notification.read = true;
            self.records.update_notification(&notification)?;
            debug!(notification = %notification_id, user = user_id, "notification marked read");
        }
        Ok(notification)
    }
}
