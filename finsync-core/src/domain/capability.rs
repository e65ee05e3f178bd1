//! Provider capabilities

use std::fmt;

use serde::{Deserialize, Serialize};

/// An operation a provider adapter may support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    ExchangePublicToken,
    CreateLinkToken,
    CreatePublicToken,
    GetItem,
    GetAccounts,
    GetBalance,
    GetTransactions,
    GetIdentity,
    GetAuth,
    GetInvestmentTransactions,
    GetHoldings,
    CreateAssetReport,
    GetAssetReport,
    GetAssetReportPdf,
    CreatePayment,
    GetPayment,
    RefreshConnectionInteractive,
    CreateConnectionInteractive,
}

impl Capability {
    pub const ALL: [Capability; 18] = [
        Capability::ExchangePublicToken,
        Capability::CreateLinkToken,
        Capability::CreatePublicToken,
        Capability::GetItem,
        Capability::GetAccounts,
        Capability::GetBalance,
        Capability::GetTransactions,
        Capability::GetIdentity,
        Capability::GetAuth,
        Capability::GetInvestmentTransactions,
        Capability::GetHoldings,
        Capability::CreateAssetReport,
        Capability::GetAssetReport,
        Capability::GetAssetReportPdf,
        Capability::CreatePayment,
        Capability::GetPayment,
        Capability::RefreshConnectionInteractive,
        Capability::CreateConnectionInteractive,
    ];
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
