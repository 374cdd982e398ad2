// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Background jobs run by the [`warden_server_jobs::JobScheduler`].

mod job_history_cleanup;
mod reconciliation;
mod traffic_accounting;
mod usage_reset;

pub use job_history_cleanup::JobHistoryCleanupJob;
pub use reconciliation::ReconciliationJob;
pub use traffic_accounting::TrafficAccountingJob;
pub use usage_reset::{is_monthly_reset_due, MonthlyUsageResetJob};
