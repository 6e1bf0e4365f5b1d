//! marginfi client: off-chain margin valuation for a marginfi account, its base
//! collateral bank and the UTP (Mango, 01) sub-accounts it delegates to.

#![deny(unsafe_code)]

// 1. mod constants
pub mod constants {
    use core::mem::size_of;
    use crate::state::{MarginfiAccountState, MarginfiGroupState};

    pub const DISCRIMINATOR_LEN: usize = 8;
    pub const GROUP_LEN: usize = DISCRIMINATOR_LEN + size_of::<MarginfiGroupState>();
    pub const ACCOUNT_LEN: usize = DISCRIMINATOR_LEN + size_of::<MarginfiAccountState>();
    pub const MAX_UTPS: usize = 32;

    pub const COLLATERAL_DECIMALS: u8 = 6;
    pub const COLLATERAL_SCALING_FACTOR: f64 = 1_000_000.0;

    /// Share of the init/maint gap added to the maintenance ratio for
    /// partial liquidation.
    pub const PARTIAL_LIQUIDATION_FACTOR: f64 = 0.2;

    pub const LIQUIDATOR_LIQUIDATION_FEE: f64 = 0.025;
    pub const INSURANCE_VAULT_LIQUIDATION_FEE: f64 = 0.025;
    pub const REBALANCE_DEPOSIT_FRACTION: f64 = 0.95;

    /// Age (seconds) past which a cached UTP observation is reported stale.
    pub const OBSERVATION_STALENESS_SECS: i64 = 5;

    pub const PDA_UTP_AUTH_SEED: &[u8] = b"ZEhiKcLS";
    pub const PDA_BANK_VAULT_SEED: &[u8] = b"zE8d8R9G";
    pub const PDA_BANK_INSURANCE_VAULT_SEED: &[u8] = b"uDMUkwVG";
    pub const PDA_BANK_FEE_VAULT_SEED: &[u8] = b"PpqJY00S";

    pub const MANGO_ACCOUNT_NUMBER: u64 = 0;
    pub const ZO_MARGIN_SEED: &[u8] = b"marginv1";
    pub const ZO_CONTROL_ACCOUNT_LEN: usize = 8 + 4482;

    pub const MANGO_DEFAULT_ORDER_LIMIT: u8 = 20;
    pub const ZO_DEFAULT_ORDER_LIMIT: u16 = 10;
    pub const ZO_PLACE_ORDER_COMPUTE_UNITS: u32 = 400_000;
}

// 2. mod error
pub mod error {
    use solana_program::{program_error::ProgramError, pubkey::Pubkey};
    use thiserror::Error;
    use crate::state::UtpIndex;

    #[derive(Debug, Error)]
    pub enum MarginfiError {
        #[error("account {0} not found")]
        AccountNotFound(Pubkey),
        #[error("marginfi group mismatch: expected {expected}, found {found}")]
        GroupMismatch { expected: Pubkey, found: Pubkey },
        #[error("collateral mint mismatch: expected {expected}, found {found}")]
        MintMismatch { expected: Pubkey, found: Pubkey },
        #[error("{0} UTP is not active")]
        UtpInactive(UtpIndex),
        #[error("rpc error: {0}")]
        RpcError(String),
        #[error("illegal config: {0}")]
        IllegalConfig(String),
        #[error("invalid {0} account data")]
        InvalidAccountData(&'static str),
        #[error("invalid amount {0}")]
        InvalidAmount(f64),
        #[error("unsupported UTP index {0}")]
        UnsupportedUtp(u8),
        #[error(transparent)]
        ProgramError(#[from] ProgramError),
    }

    pub type Result<T> = core::result::Result<T, MarginfiError>;
}

// 3. mod config
pub mod config {
    use solana_program::{pubkey, pubkey::Pubkey};
    use crate::error::{MarginfiError, Result};
    use crate::state::UtpIndex;

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum Environment {
        Mainnet,
        Devnet,
        Localnet,
    }

    fn require_configured(pk: Pubkey, what: &str) -> Result<Pubkey> {
        if pk == Pubkey::default() {
            return Err(MarginfiError::IllegalConfig(format!("{what} is not configured")));
        }
        Ok(pk)
    }

    /// Mango venue addresses. Everything below `group_pk` lives in the Mango
    /// group account and has to be supplied with [`MangoConfig::with_group_accounts`].
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub struct MangoConfig {
        pub utp_index: UtpIndex,
        pub program_id: Pubkey,
        pub group_pk: Pubkey,
        pub cache_pk: Pubkey,
        pub root_bank_pk: Pubkey,
        pub node_bank_pk: Pubkey,
        pub vault_pk: Pubkey,
        pub signer_pk: Pubkey,
    }

    impl MangoConfig {
        pub fn new(environment: Environment) -> Self {
            let (program_id, group_pk) = match environment {
                Environment::Mainnet => (
                    pubkey!("mv3ekLzLbnVPNxjSKvqBpU3ZeZXPQdEC3bp5MDEBG68"),
                    pubkey!("98pjRuQjK3qA6gXts96PqZT4Ze5QmnCmt3QYjhbUSPue"),
                ),
                Environment::Devnet | Environment::Localnet => (
                    pubkey!("4skJ85cdxQAFVKbcGgfun8iZPL7BadVYXG3kGEGkufqA"),
                    pubkey!("Ec2enZyoC4nGpEfu2sUNAa2nUGJHWxoUWYSEJ2hNTWTA"),
                ),
            };
            Self {
                utp_index: UtpIndex::Mango,
                program_id,
                group_pk,
                cache_pk: Pubkey::default(),
                root_bank_pk: Pubkey::default(),
                node_bank_pk: Pubkey::default(),
                vault_pk: Pubkey::default(),
                signer_pk: Pubkey::default(),
            }
        }

        pub fn with_program_id(mut self, program_id: Pubkey) -> Self {
            self.program_id = program_id;
            self
        }

        pub fn with_group(mut self, group_pk: Pubkey) -> Self {
            self.group_pk = group_pk;
            self
        }

        pub fn with_group_accounts(
            mut self,
            cache_pk: Pubkey,
            root_bank_pk: Pubkey,
            node_bank_pk: Pubkey,
            vault_pk: Pubkey,
            signer_pk: Pubkey,
        ) -> Self {
            self.cache_pk = cache_pk;
            self.root_bank_pk = root_bank_pk;
            self.node_bank_pk = node_bank_pk;
            self.vault_pk = vault_pk;
            self.signer_pk = signer_pk;
            self
        }

        pub fn cache(&self) -> Result<Pubkey> {
            require_configured(self.cache_pk, "Mango cache")
        }

        /// Root bank, node bank, vault and vault signer, in instruction order.
        pub fn bank_accounts(&self) -> Result<[Pubkey; 4]> {
            Ok([
                require_configured(self.root_bank_pk, "Mango root bank")?,
                require_configured(self.node_bank_pk, "Mango node bank")?,
                require_configured(self.vault_pk, "Mango vault")?,
                require_configured(self.signer_pk, "Mango vault signer")?,
            ])
        }
    }

    /// 01 venue addresses. `cache_pk`, `state_signer_pk` and `vault_pk` come
    /// from the 01 state account and are supplied with [`ZoConfig::with_state_accounts`].
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub struct ZoConfig {
        pub utp_index: UtpIndex,
        pub program_id: Pubkey,
        pub state_pk: Pubkey,
        pub dex_program: Pubkey,
        pub heimdall: Pubkey,
        pub cache_pk: Pubkey,
        pub state_signer_pk: Pubkey,
        pub vault_pk: Pubkey,
    }

    impl ZoConfig {
        pub fn new(environment: Environment) -> Self {
            let (program_id, state_pk, dex_program, heimdall) = match environment {
                Environment::Mainnet => (
                    pubkey!("Zo1ggzTUKMY5bYnDvT5mtVeZxzf2FaLTbKkmvGUhUQk"),
                    pubkey!("71yykwxq1zQqy99PgRsgZJXi2HHK2UDx9G4va7pH6qRv"),
                    pubkey!("ZDx8a8jBqGmJyxi1whFxxCo5vG6Q9t4hTzW2GSixMKK"),
                    pubkey!("Cyvjas5Hg6nb6RNsuCi8sK3kcjbWzTgdJcHxmSYS8mkY"),
                ),
                Environment::Devnet | Environment::Localnet => (
                    pubkey!("Zo1ThtSHMh9tZGECwBDL81WJRL6s3QTHf733Tyko7KQ"),
                    pubkey!("KwcWW7WvgSXLJcyjKZJBHLbfriErggzYHpjS9qjVD5F"),
                    pubkey!("ZDxUi178LkcuwdxcEqsSo2E7KATH99LAAXN5LcSVMBC"),
                    pubkey!("Aoi3SGj4zLiMQSHrJ4yEDFwMQnGjVQCeKSYD6ygi6WLr"),
                ),
            };
            Self {
                utp_index: UtpIndex::Zo,
                program_id,
                state_pk,
                dex_program,
                heimdall,
                cache_pk: Pubkey::default(),
                state_signer_pk: Pubkey::default(),
                vault_pk: Pubkey::default(),
            }
        }

        pub fn with_program_id(mut self, program_id: Pubkey) -> Self {
            self.program_id = program_id;
            self
        }

        pub fn with_state(mut self, state_pk: Pubkey) -> Self {
            self.state_pk = state_pk;
            self
        }

        pub fn with_state_accounts(mut self, cache_pk: Pubkey, state_signer_pk: Pubkey, vault_pk: Pubkey) -> Self {
            self.cache_pk = cache_pk;
            self.state_signer_pk = state_signer_pk;
            self.vault_pk = vault_pk;
            self
        }

        pub fn cache(&self) -> Result<Pubkey> {
            require_configured(self.cache_pk, "01 cache")
        }

        pub fn state_signer(&self) -> Result<Pubkey> {
            require_configured(self.state_signer_pk, "01 state signer")
        }

        /// State signer and collateral vault, in instruction order.
        pub fn vault_accounts(&self) -> Result<[Pubkey; 2]> {
            Ok([
                self.state_signer()?,
                require_configured(self.vault_pk, "01 vault")?,
            ])
        }
    }

    /// Built once at startup and passed by reference; nothing here is global.
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub struct MarginfiConfig {
        pub environment: Environment,
        pub program_id: Pubkey,
        pub group_pk: Pubkey,
        pub collateral_mint_pk: Pubkey,
        pub mango: MangoConfig,
        pub zo: ZoConfig,
    }

    impl MarginfiConfig {
        pub fn new(environment: Environment) -> Self {
            let (program_id, group_pk, collateral_mint_pk) = match environment {
                Environment::Mainnet => (
                    pubkey!("mrgnfD8pJKsw4AxCDquyUBjgABNEaZ79iTLgtov2Yff"),
                    pubkey!("Fp3Ytjx9XVT4Sbv78ddkBC2HtT6nomVjtAjMTZwcDcba"),
                    pubkey!("EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v"),
                ),
                Environment::Devnet => (
                    pubkey!("mfi5YpVKT1bAJbKv7h55c6LgoTsW3LvZyRm2k811XtK"),
                    pubkey!("7AYHgp3Z8AriGTVKYZ8c7GdW5m2Y3cBDacmWEuPGD2Gg"),
                    pubkey!("8FRFC6MoGGkMFQwngccyu69VnYbzykGeez7ignHVAFSN"),
                ),
                Environment::Localnet => (
                    pubkey!("DzEv7WuxdzRJ9iTdT5X6RmX2gdzSXUvyQ14ELmveiFSQ"),
                    pubkey!("Fp3Ytjx9XVT4Sbv78ddkBC2HtT6nomVjtAjMTZwcDcba"),
                    pubkey!("8FRFC6MoGGkMFQwngccyu69VnYbzykGeez7ignHVAFSN"),
                ),
            };
            Self {
                environment,
                program_id,
                group_pk,
                collateral_mint_pk,
                mango: MangoConfig::new(environment),
                zo: ZoConfig::new(environment),
            }
        }

        pub fn with_program_id(mut self, program_id: Pubkey) -> Self {
            self.program_id = program_id;
            self
        }

        pub fn with_group(mut self, group_pk: Pubkey) -> Self {
            self.group_pk = group_pk;
            self
        }

        pub fn with_collateral_mint(mut self, collateral_mint_pk: Pubkey) -> Self {
            self.collateral_mint_pk = collateral_mint_pk;
            self
        }

        pub fn with_mango(mut self, mango: MangoConfig) -> Self {
            self.mango = mango;
            self
        }

        pub fn with_zo(mut self, zo: ZoConfig) -> Self {
            self.zo = zo;
            self
        }

        pub fn utp_program_id(&self, index: UtpIndex) -> Pubkey {
            match index {
                UtpIndex::Mango => self.mango.program_id,
                UtpIndex::Zo => self.zo.program_id,
            }
        }
    }
}

// 4. mod state
pub mod state {
    use arrayref::array_ref;
    use bytemuck::{Pod, Zeroable};
    use core::fmt;
    use fixed::types::I80F48;
    use num_derive::FromPrimitive;
    use num_traits::FromPrimitive;
    use solana_program::hash::hashv;
    use crate::constants::{ACCOUNT_LEN, DISCRIMINATOR_LEN, GROUP_LEN, MAX_UTPS};
    use crate::error::{MarginfiError, Result};

    pub const GROUP_ACCOUNT_NAME: &str = "MarginfiGroup";
    pub const MARGINFI_ACCOUNT_NAME: &str = "MarginfiAccount";

    #[repr(u8)]
    #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, FromPrimitive)]
    pub enum UtpIndex {
        Mango = 0,
        Zo = 1,
    }

    impl UtpIndex {
        pub const ALL: [UtpIndex; 2] = [UtpIndex::Mango, UtpIndex::Zo];

        pub fn slot(self) -> usize {
            self as usize
        }
    }

    impl TryFrom<u8> for UtpIndex {
        type Error = MarginfiError;

        fn try_from(value: u8) -> Result<Self> {
            <UtpIndex as FromPrimitive>::from_u8(value).ok_or(MarginfiError::UnsupportedUtp(value))
        }
    }

    impl fmt::Display for UtpIndex {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                UtpIndex::Mango => f.write_str("Mango"),
                UtpIndex::Zo => f.write_str("01"),
            }
        }
    }

    /// I80F48 stored as its 16 little-endian bytes.
    #[repr(C)]
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
    pub struct WrappedI80F48 {
        pub value: [u8; 16],
    }

    impl From<I80F48> for WrappedI80F48 {
        fn from(v: I80F48) -> Self {
            Self { value: v.to_bits().to_le_bytes() }
        }
    }

    impl From<WrappedI80F48> for I80F48 {
        fn from(w: WrappedI80F48) -> Self {
            I80F48::from_bits(i128::from_le_bytes(w.value))
        }
    }

    impl WrappedI80F48 {
        pub fn to_f64(self) -> f64 {
            I80F48::from(self).to_num::<f64>()
        }
    }

    // Accounts are Borsh-serialized without padding, so every field below is
    // align-1 and the structs match the on-chain byte order exactly.

    pub const BANK_RESERVED_LEN: usize = 31 * 16;
    pub const GROUP_RESERVED_LEN: usize = 384 * 16;
    pub const UTP_CONFIG_RESERVED_LEN: usize = 32 * 4;
    pub const ACCOUNT_RESERVED_LEN: usize = 254 * 16;
    pub const UTP_ADDRESS_BOOK_LEN: usize = 4;

    #[repr(C)]
    #[derive(Clone, Copy, Pod, Zeroable)]
    pub struct BankState {
        pub scaling_factor_c: WrappedI80F48,
        pub fixed_fee: WrappedI80F48,
        pub interest_fee: WrappedI80F48,
        pub deposit_accumulator: WrappedI80F48,
        pub borrow_accumulator: WrappedI80F48,
        /// i64, little-endian.
        pub last_update: [u8; 8],
        pub total_deposits_record: WrappedI80F48,
        pub total_borrows_record: WrappedI80F48,
        pub mint: [u8; 32],
        pub vault: [u8; 32],
        pub vault_authority_pda_bump: u8,
        pub insurance_vault: [u8; 32],
        pub insurance_vault_authority_pda_bump: u8,
        pub insurance_vault_outstanding_transfers: WrappedI80F48,
        pub fee_vault: [u8; 32],
        pub fee_vault_authority_pda_bump: u8,
        pub fee_vault_outstanding_transfers: WrappedI80F48,
        pub init_margin_ratio: WrappedI80F48,
        pub maint_margin_ratio: WrappedI80F48,
        pub account_deposit_limit: WrappedI80F48,
        pub lp_deposit_limit: WrappedI80F48,
        pub _reserved: [u8; BANK_RESERVED_LEN],
    }

    impl BankState {
        pub fn last_update(&self) -> i64 {
            i64::from_le_bytes(self.last_update)
        }
    }

    #[repr(C)]
    #[derive(Clone, Copy, Pod, Zeroable)]
    pub struct MarginfiGroupState {
        pub admin: [u8; 32],
        pub bank: BankState,
        pub paused: u8,
        pub _reserved: [u8; GROUP_RESERVED_LEN],
    }

    #[repr(C)]
    #[derive(Clone, Copy, Pod, Zeroable)]
    pub struct UtpAccountConfigState {
        pub address: [u8; 32],
        pub authority_seed: [u8; 32],
        pub authority_bump: u8,
        pub utp_address_book: [[u8; 32]; UTP_ADDRESS_BOOK_LEN],
        pub _reserved: [u8; UTP_CONFIG_RESERVED_LEN],
    }

    #[repr(C)]
    #[derive(Clone, Copy, Pod, Zeroable)]
    pub struct MarginfiAccountState {
        pub authority: [u8; 32],
        pub marginfi_group: [u8; 32],
        pub deposit_record: WrappedI80F48,
        pub borrow_record: WrappedI80F48,
        /// One bool byte per UTP slot.
        pub active_utps: [u8; MAX_UTPS],
        pub utp_account_config: [UtpAccountConfigState; MAX_UTPS],
        pub deposit_limit: WrappedI80F48,
        /// u16 flag bits, little-endian.
        pub flags: [u8; 2],
        pub _reserved: [u8; ACCOUNT_RESERVED_LEN],
    }

    impl MarginfiAccountState {
        pub fn flags(&self) -> u16 {
            u16::from_le_bytes(self.flags)
        }
    }

    pub fn account_discriminator(name: &str) -> [u8; DISCRIMINATOR_LEN] {
        let hash = hashv(&[b"account:", name.as_bytes()]).to_bytes();
        *array_ref![hash, 0, DISCRIMINATOR_LEN]
    }

    fn check_account(data: &[u8], len: usize, name: &'static str) -> Result<()> {
        if data.len() < len {
            return Err(MarginfiError::InvalidAccountData(name));
        }
        if *array_ref![data, 0, DISCRIMINATOR_LEN] != account_discriminator(name) {
            return Err(MarginfiError::InvalidAccountData(name));
        }
        Ok(())
    }

    pub fn read_group(data: &[u8]) -> Result<MarginfiGroupState> {
        check_account(data, GROUP_LEN, GROUP_ACCOUNT_NAME)?;
        let mut g = MarginfiGroupState::zeroed();
        let src = &data[DISCRIMINATOR_LEN..GROUP_LEN];
        let dst = bytemuck::bytes_of_mut(&mut g);
        dst.copy_from_slice(src);
        Ok(g)
    }

    pub fn write_group(data: &mut [u8], g: &MarginfiGroupState) {
        data[..DISCRIMINATOR_LEN].copy_from_slice(&account_discriminator(GROUP_ACCOUNT_NAME));
        let src = bytemuck::bytes_of(g);
        let dst = &mut data[DISCRIMINATOR_LEN..GROUP_LEN];
        dst.copy_from_slice(src);
    }

    pub fn read_account(data: &[u8]) -> Result<MarginfiAccountState> {
        check_account(data, ACCOUNT_LEN, MARGINFI_ACCOUNT_NAME)?;
        let mut a = MarginfiAccountState::zeroed();
        let src = &data[DISCRIMINATOR_LEN..ACCOUNT_LEN];
        let dst = bytemuck::bytes_of_mut(&mut a);
        dst.copy_from_slice(src);
        Ok(a)
    }

    pub fn write_account(data: &mut [u8], a: &MarginfiAccountState) {
        data[..DISCRIMINATOR_LEN].copy_from_slice(&account_discriminator(MARGINFI_ACCOUNT_NAME));
        let src = bytemuck::bytes_of(a);
        let dst = &mut data[DISCRIMINATOR_LEN..ACCOUNT_LEN];
        dst.copy_from_slice(src);
    }
}

// 5. mod pda
pub mod pda {
    use solana_program::{pubkey, pubkey::Pubkey};
    use crate::constants::{
        PDA_BANK_FEE_VAULT_SEED, PDA_BANK_INSURANCE_VAULT_SEED, PDA_BANK_VAULT_SEED, PDA_UTP_AUTH_SEED,
        ZO_MARGIN_SEED,
    };

    pub const ASSOCIATED_TOKEN_PROGRAM_ID: Pubkey = pubkey!("ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL");

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum BankVaultType {
        LiquidityVault,
        InsuranceVault,
        ProtocolFeeVault,
    }

    impl BankVaultType {
        pub fn seed(self) -> &'static [u8] {
            match self {
                BankVaultType::LiquidityVault => PDA_BANK_VAULT_SEED,
                BankVaultType::InsuranceVault => PDA_BANK_INSURANCE_VAULT_SEED,
                BankVaultType::ProtocolFeeVault => PDA_BANK_FEE_VAULT_SEED,
            }
        }
    }

    pub fn bank_authority(group_pk: &Pubkey, program_id: &Pubkey, vault_type: BankVaultType) -> (Pubkey, u8) {
        Pubkey::find_program_address(&[vault_type.seed(), group_pk.as_ref()], program_id)
    }

    pub fn utp_authority(utp_program_id: &Pubkey, authority_seed: &Pubkey, program_id: &Pubkey) -> (Pubkey, u8) {
        Pubkey::find_program_address(
            &[PDA_UTP_AUTH_SEED, utp_program_id.as_ref(), authority_seed.as_ref()],
            program_id,
        )
    }

    pub fn mango_account_address(
        mango_program_id: &Pubkey,
        mango_group: &Pubkey,
        authority: &Pubkey,
        account_number: u64,
    ) -> (Pubkey, u8) {
        Pubkey::find_program_address(
            &[mango_group.as_ref(), authority.as_ref(), &account_number.to_le_bytes()],
            mango_program_id,
        )
    }

    pub fn zo_margin_address(zo_program_id: &Pubkey, authority: &Pubkey, zo_state: &Pubkey) -> (Pubkey, u8) {
        Pubkey::find_program_address(&[authority.as_ref(), zo_state.as_ref(), ZO_MARGIN_SEED], zo_program_id)
    }

    /// 01 open orders account of `control` on `dex_market`.
    pub fn zo_open_orders_address(dex_program: &Pubkey, control: &Pubkey, dex_market: &Pubkey) -> (Pubkey, u8) {
        Pubkey::find_program_address(&[control.as_ref(), dex_market.as_ref()], dex_program)
    }

    pub fn associated_token_address(wallet: &Pubkey, mint: &Pubkey) -> Pubkey {
        Pubkey::find_program_address(
            &[wallet.as_ref(), spl_token::id().as_ref(), mint.as_ref()],
            &ASSOCIATED_TOKEN_PROGRAM_ID,
        )
        .0
    }
}

// 6. mod provider
pub mod provider {
    use log::error;
    use solana_program::{instruction::Instruction, pubkey::Pubkey};
    use solana_sdk::signature::{Keypair, Signature};
    use std::time::{SystemTime, UNIX_EPOCH};
    use crate::error::{MarginfiError, Result};

    /// Request/response boundary to the cluster. Every call is one round trip.
    pub trait Provider {
        fn wallet(&self) -> Pubkey;

        /// `None` for accounts that do not exist; one entry per requested key.
        fn get_multiple_accounts_data(&self, pubkeys: &[Pubkey]) -> Result<Vec<Option<Vec<u8>>>>;

        fn get_account_data(&self, pubkey: &Pubkey) -> Result<Option<Vec<u8>>> {
            Ok(self.get_multiple_accounts_data(&[*pubkey])?.pop().flatten())
        }

        fn minimum_balance_for_rent_exemption(&self, len: usize) -> Result<u64>;

        /// Signs with the wallet plus `extra_signers`, sends and confirms.
        fn send(&self, instructions: &[Instruction], extra_signers: &[&Keypair]) -> Result<Signature>;

        fn unix_timestamp(&self) -> i64 {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0)
        }
    }

    /// Fetches `pubkeys` in one round trip, failing on the first missing one.
    pub fn fetch_accounts<P: Provider + ?Sized>(
        provider: &P,
        pubkeys: &[Pubkey],
        roles: &[&str],
    ) -> Result<Vec<Vec<u8>>> {
        let response = provider.get_multiple_accounts_data(pubkeys)?;
        if response.len() != pubkeys.len() {
            return Err(MarginfiError::RpcError(format!(
                "requested {} accounts, received {}",
                pubkeys.len(),
                response.len()
            )));
        }
        response
            .into_iter()
            .zip(pubkeys)
            .enumerate()
            .map(|(i, (data, pk))| {
                data.ok_or_else(|| {
                    error!("{} {} not found", roles.get(i).copied().unwrap_or("account"), pk);
                    MarginfiError::AccountNotFound(*pk)
                })
            })
            .collect()
    }

    #[cfg(feature = "rpc")]
    pub use rpc::RpcProvider;

    #[cfg(feature = "rpc")]
    mod rpc {
        use solana_client::rpc_client::RpcClient;
        use solana_program::{instruction::Instruction, pubkey::Pubkey};
        use solana_sdk::signature::{Keypair, Signature, Signer};
        use solana_sdk::transaction::Transaction;
        use super::Provider;
        use crate::error::{MarginfiError, Result};

        fn rpc_error(e: impl std::fmt::Display) -> MarginfiError {
            MarginfiError::RpcError(e.to_string())
        }

        pub struct RpcProvider {
            client: RpcClient,
            payer: Keypair,
        }

        impl RpcProvider {
            pub fn new(client: RpcClient, payer: Keypair) -> Self {
                Self { client, payer }
            }

            pub fn client(&self) -> &RpcClient {
                &self.client
            }
        }

        impl Provider for RpcProvider {
            fn wallet(&self) -> Pubkey {
                self.payer.pubkey()
            }

            fn get_multiple_accounts_data(&self, pubkeys: &[Pubkey]) -> Result<Vec<Option<Vec<u8>>>> {
                let accounts = self.client.get_multiple_accounts(pubkeys).map_err(rpc_error)?;
                Ok(accounts.into_iter().map(|a| a.map(|a| a.data)).collect())
            }

            fn minimum_balance_for_rent_exemption(&self, len: usize) -> Result<u64> {
                self.client.get_minimum_balance_for_rent_exemption(len).map_err(rpc_error)
            }

            fn send(&self, instructions: &[Instruction], extra_signers: &[&Keypair]) -> Result<Signature> {
                let blockhash = self.client.get_latest_blockhash().map_err(rpc_error)?;
                let mut signers: Vec<&dyn Signer> = vec![&self.payer as &dyn Signer];
                signers.extend(extra_signers.iter().map(|k| *k as &dyn Signer));
                let tx = Transaction::new_signed_with_payer(
                    instructions,
                    Some(&self.payer.pubkey()),
                    &signers,
                    blockhash,
                );
                self.client.send_and_confirm_transaction(&tx).map_err(rpc_error)
            }
        }
    }
}

// 7. mod bank
pub mod bank {
    use fixed::types::I80F48;
    use solana_program::pubkey::Pubkey;
    use crate::constants::{COLLATERAL_SCALING_FACTOR, PARTIAL_LIQUIDATION_FACTOR};
    use crate::error::{MarginfiError, Result};
    use crate::state::BankState;

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum BankSide {
        Deposit,
        Borrow,
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum MarginRequirement {
        Init,
        Maint,
        PartialLiquidation,
    }

    pub fn native_to_ui(native: f64) -> f64 {
        native / COLLATERAL_SCALING_FACTOR
    }

    /// Truncates toward zero, like the program's token math. Negative,
    /// non-finite and out-of-range amounts are rejected.
    pub fn ui_to_native(ui_amount: f64) -> Result<u64> {
        let native = ui_amount * COLLATERAL_SCALING_FACTOR;
        if !native.is_finite() || native < 0.0 || native >= u64::MAX as f64 {
            return Err(MarginfiError::InvalidAmount(ui_amount));
        }
        Ok(native as u64)
    }

    /// Interest and fee model for the group's single collateral asset.
    #[derive(Clone, Debug, PartialEq)]
    pub struct Bank {
        pub scaling_factor_c: f64,
        pub fixed_fee: f64,
        pub interest_fee: f64,
        pub deposit_accumulator: I80F48,
        pub borrow_accumulator: I80F48,
        pub last_update: i64,
        pub total_deposits_record: I80F48,
        pub total_borrows_record: I80F48,
        pub mint: Pubkey,
        pub vault: Pubkey,
        pub insurance_vault: Pubkey,
        pub fee_vault: Pubkey,
        pub insurance_vault_outstanding_transfers: f64,
        pub fee_vault_outstanding_transfers: f64,
        pub init_margin_ratio: f64,
        pub maint_margin_ratio: f64,
        pub account_deposit_limit: f64,
        pub lp_deposit_limit: f64,
        pub vault_authority_bump: u8,
        pub insurance_vault_authority_bump: u8,
        pub fee_vault_authority_bump: u8,
    }

    impl Bank {
        pub fn from_state(s: &BankState) -> Self {
            Self {
                scaling_factor_c: s.scaling_factor_c.to_f64(),
                fixed_fee: s.fixed_fee.to_f64(),
                interest_fee: s.interest_fee.to_f64(),
                deposit_accumulator: s.deposit_accumulator.into(),
                borrow_accumulator: s.borrow_accumulator.into(),
                last_update: s.last_update(),
                total_deposits_record: s.total_deposits_record.into(),
                total_borrows_record: s.total_borrows_record.into(),
                mint: Pubkey::new_from_array(s.mint),
                vault: Pubkey::new_from_array(s.vault),
                insurance_vault: Pubkey::new_from_array(s.insurance_vault),
                fee_vault: Pubkey::new_from_array(s.fee_vault),
                insurance_vault_outstanding_transfers: s.insurance_vault_outstanding_transfers.to_f64(),
                fee_vault_outstanding_transfers: s.fee_vault_outstanding_transfers.to_f64(),
                init_margin_ratio: s.init_margin_ratio.to_f64(),
                maint_margin_ratio: s.maint_margin_ratio.to_f64(),
                account_deposit_limit: s.account_deposit_limit.to_f64(),
                lp_deposit_limit: s.lp_deposit_limit.to_f64(),
                vault_authority_bump: s.vault_authority_pda_bump,
                insurance_vault_authority_bump: s.insurance_vault_authority_pda_bump,
                fee_vault_authority_bump: s.fee_vault_authority_pda_bump,
            }
        }

        fn accumulator(&self, side: BankSide) -> I80F48 {
            match side {
                BankSide::Deposit => self.deposit_accumulator,
                BankSide::Borrow => self.borrow_accumulator,
            }
        }

        /// `record * accumulator`, in native token units.
        pub fn compute_native_amount(&self, record: I80F48, side: BankSide) -> f64 {
            record.to_num::<f64>() * self.accumulator(side).to_num::<f64>()
        }

        /// Inverse of [`Bank::compute_native_amount`]; `None` if the accumulator
        /// is zero or the record does not fit.
        pub fn compute_record_amount(&self, native: f64, side: BankSide) -> Option<I80F48> {
            let accumulator = self.accumulator(side).to_num::<f64>();
            if accumulator == 0.0 {
                return None;
            }
            I80F48::checked_from_num(native / accumulator)
        }

        pub fn compute_margin_ratio(&self, kind: MarginRequirement) -> Result<f64> {
            let ratio = match kind {
                MarginRequirement::Init => self.init_margin_ratio,
                MarginRequirement::Maint => self.maint_margin_ratio,
                MarginRequirement::PartialLiquidation => {
                    self.maint_margin_ratio
                        + PARTIAL_LIQUIDATION_FACTOR * (self.init_margin_ratio - self.maint_margin_ratio)
                }
            };
            if !(ratio > 0.0) {
                return Err(MarginfiError::IllegalConfig(format!("{kind:?} margin ratio is {ratio}")));
            }
            Ok(ratio)
        }

        pub fn total_deposits(&self) -> f64 {
            self.compute_native_amount(self.total_deposits_record, BankSide::Deposit)
        }

        pub fn total_borrows(&self) -> f64 {
            self.compute_native_amount(self.total_borrows_record, BankSide::Borrow)
        }

        pub fn utilization(&self) -> f64 {
            let deposits = self.total_deposits();
            if deposits == 0.0 {
                return 0.0;
            }
            self.total_borrows() / deposits
        }
    }
}

// 8. mod group
pub mod group {
    use log::debug;
    use solana_program::{instruction::Instruction, pubkey::Pubkey};
    use solana_sdk::signature::Signature;
    use crate::bank::Bank;
    use crate::config::MarginfiConfig;
    use crate::error::{MarginfiError, Result};
    use crate::ix;
    use crate::pda::{bank_authority, BankVaultType};
    use crate::provider::{fetch_accounts, Provider};
    use crate::state::{read_group, MarginfiGroupState};

    #[derive(Clone, Debug, PartialEq)]
    pub struct MarginfiGroup {
        pub pubkey: Pubkey,
        pub admin: Pubkey,
        pub bank: Bank,
        pub paused: bool,
    }

    impl MarginfiGroup {
        pub fn fetch<P: Provider + ?Sized>(config: &MarginfiConfig, provider: &P) -> Result<Self> {
            debug!("loading marginfi group {}", config.group_pk);
            let mut data = fetch_accounts(provider, &[config.group_pk], &["marginfi group"])?;
            let data = data.pop().ok_or(MarginfiError::AccountNotFound(config.group_pk))?;
            Self::from_account_data_raw(config, &data)
        }

        /// Rejects a bank whose mint is not the configured collateral mint.
        pub fn from_account_data(config: &MarginfiConfig, state: &MarginfiGroupState) -> Result<Self> {
            let mint = Pubkey::new_from_array(state.bank.mint);
            if mint != config.collateral_mint_pk {
                return Err(MarginfiError::MintMismatch { expected: config.collateral_mint_pk, found: mint });
            }
            Ok(Self {
                pubkey: config.group_pk,
                admin: Pubkey::new_from_array(state.admin),
                bank: Bank::from_state(&state.bank),
                paused: state.paused != 0,
            })
        }

        pub fn from_account_data_raw(config: &MarginfiConfig, data: &[u8]) -> Result<Self> {
            let state = read_group(data)?;
            Self::from_account_data(config, &state)
        }

        pub fn reload<P: Provider + ?Sized>(&mut self, config: &MarginfiConfig, provider: &P) -> Result<()> {
            *self = Self::fetch(config, provider)?;
            Ok(())
        }

        pub fn make_update_interest_accumulator_ix(&self, program_id: &Pubkey) -> Instruction {
            let (bank_authority, _) = bank_authority(&self.pubkey, program_id, BankVaultType::LiquidityVault);
            ix::update_interest_accumulator(program_id, &self.pubkey, &self.bank.vault, &bank_authority, &self.bank.fee_vault)
        }

        pub fn update_interest_accumulator<P: Provider + ?Sized>(
            &mut self,
            config: &MarginfiConfig,
            provider: &P,
        ) -> Result<Signature> {
            let ix = self.make_update_interest_accumulator_ix(&config.program_id);
            let sig = provider.send(&[ix], &[])?;
            debug!("interest accumulator updated: {}", sig);
            self.reload(config, provider)?;
            Ok(sig)
        }
    }
}

// 9. mod observation
pub mod observation {
    use crate::bank::native_to_ui;
    use crate::constants::{INSURANCE_VAULT_LIQUIDATION_FEE, LIQUIDATOR_LIQUIDATION_FEE, OBSERVATION_STALENESS_SECS};

    /// Point-in-time risk snapshot of one UTP position, in UI units.
    #[derive(Clone, Copy, Debug, PartialEq)]
    pub struct UtpObservation {
        pub timestamp: i64,
        pub equity: f64,
        pub free_collateral: f64,
        pub init_margin_requirement: f64,
        pub liquidation_value: f64,
        pub is_rebalance_deposit_needed: bool,
        pub max_rebalance_deposit_amount: f64,
        pub is_empty: bool,
    }

    pub const EMPTY_OBSERVATION: UtpObservation = UtpObservation {
        timestamp: 0,
        equity: 0.0,
        free_collateral: 0.0,
        init_margin_requirement: 0.0,
        liquidation_value: 0.0,
        is_rebalance_deposit_needed: false,
        max_rebalance_deposit_amount: 0.0,
        is_empty: false,
    };

    /// Venue decoder output, amounts in native collateral units.
    #[derive(Clone, Copy, Debug, PartialEq)]
    pub struct RawObservation {
        pub timestamp: i64,
        pub equity: f64,
        pub free_collateral: f64,
        pub init_margin_requirement: f64,
        pub liquidation_value: f64,
        pub is_rebalance_deposit_needed: bool,
        pub max_rebalance_deposit_amount: f64,
        pub is_empty: bool,
    }

    impl UtpObservation {
        pub fn from_raw(raw: &RawObservation) -> Self {
            Self {
                timestamp: raw.timestamp,
                equity: native_to_ui(raw.equity),
                free_collateral: native_to_ui(raw.free_collateral),
                init_margin_requirement: native_to_ui(raw.init_margin_requirement),
                liquidation_value: native_to_ui(raw.liquidation_value),
                is_rebalance_deposit_needed: raw.is_rebalance_deposit_needed,
                max_rebalance_deposit_amount: native_to_ui(raw.max_rebalance_deposit_amount),
                is_empty: raw.is_empty,
            }
        }
    }

    #[derive(Clone, Copy, Debug, PartialEq)]
    pub struct Cache<T> {
        value: T,
        fetched_at: i64,
    }

    impl<T: Copy> Cache<T> {
        pub const fn new(value: T, fetched_at: i64) -> Self {
            Self { value, fetched_at }
        }

        /// The cached value and whether it is older than the staleness threshold.
        pub fn get(&self, now: i64) -> (T, bool) {
            (self.value, self.age(now) > OBSERVATION_STALENESS_SECS)
        }

        pub fn value(&self) -> &T {
            &self.value
        }

        pub fn fetched_at(&self) -> i64 {
            self.fetched_at
        }

        pub fn age(&self, now: i64) -> i64 {
            now.saturating_sub(self.fetched_at)
        }
    }

    impl Cache<UtpObservation> {
        pub const EMPTY: Self = Cache::new(EMPTY_OBSERVATION, EMPTY_OBSERVATION.timestamp);

        pub fn observed(observation: UtpObservation) -> Self {
            Cache::new(observation, observation.timestamp)
        }
    }

    #[derive(Clone, Copy, Debug, PartialEq)]
    pub struct LiquidationPrices {
        pub final_price: f64,
        pub discounted_liquidator_price: f64,
        pub insurance_vault_fee: f64,
    }

    impl LiquidationPrices {
        pub fn from_liquidation_value(liquidation_value: f64) -> Self {
            let liquidator_fee = liquidation_value * LIQUIDATOR_LIQUIDATION_FEE;
            let insurance_vault_fee = liquidation_value * INSURANCE_VAULT_LIQUIDATION_FEE;
            let discounted_liquidator_price = liquidation_value - liquidator_fee;
            Self {
                final_price: discounted_liquidator_price - insurance_vault_fee,
                discounted_liquidator_price,
                insurance_vault_fee,
            }
        }
    }
}

// 10. mod ix
pub mod ix {
    use arrayref::array_ref;
    use solana_program::hash::hashv;
    use solana_program::instruction::{AccountMeta, Instruction};
    use solana_program::{pubkey::Pubkey, system_program, sysvar};

    pub fn sighash(name: &str) -> [u8; 8] {
        let hash = hashv(&[b"global:", name.as_bytes()]).to_bytes();
        *array_ref![hash, 0, 8]
    }

    fn instruction(program_id: &Pubkey, name: &str, args: &[u8], mut accounts: Vec<AccountMeta>, remaining: Vec<AccountMeta>) -> Instruction {
        let mut data = Vec::with_capacity(8 + args.len());
        data.extend_from_slice(&sighash(name));
        data.extend_from_slice(args);
        accounts.extend(remaining);
        Instruction { program_id: *program_id, accounts, data }
    }

    pub fn init_marginfi_account(program_id: &Pubkey, group: &Pubkey, account: &Pubkey, authority: &Pubkey) -> Instruction {
        instruction(
            program_id,
            "init_marginfi_account",
            &[],
            vec![
                AccountMeta::new(*authority, true),
                AccountMeta::new_readonly(*group, false),
                AccountMeta::new(*account, false),
                AccountMeta::new_readonly(system_program::id(), false),
            ],
            vec![],
        )
    }

    pub fn margin_deposit_collateral(
        program_id: &Pubkey,
        marginfi_account: &Pubkey,
        marginfi_group: &Pubkey,
        signer: &Pubkey,
        funding_account: &Pubkey,
        token_vault: &Pubkey,
        amount: u64,
        remaining: Vec<AccountMeta>,
    ) -> Instruction {
        instruction(
            program_id,
            "margin_deposit_collateral",
            &amount.to_le_bytes(),
            vec![
                AccountMeta::new(*marginfi_account, false),
                AccountMeta::new(*marginfi_group, false),
                AccountMeta::new_readonly(*signer, true),
                AccountMeta::new(*funding_account, false),
                AccountMeta::new(*token_vault, false),
                AccountMeta::new_readonly(spl_token::id(), false),
            ],
            remaining,
        )
    }

    pub fn margin_withdraw_collateral(
        program_id: &Pubkey,
        marginfi_account: &Pubkey,
        marginfi_group: &Pubkey,
        signer: &Pubkey,
        margin_collateral_vault: &Pubkey,
        margin_bank_authority: &Pubkey,
        receiving_token_account: &Pubkey,
        amount: u64,
        remaining: Vec<AccountMeta>,
    ) -> Instruction {
        instruction(
            program_id,
            "margin_withdraw_collateral",
            &amount.to_le_bytes(),
            vec![
                AccountMeta::new(*marginfi_account, false),
                AccountMeta::new(*marginfi_group, false),
                AccountMeta::new_readonly(*signer, true),
                AccountMeta::new(*margin_collateral_vault, false),
                AccountMeta::new_readonly(*margin_bank_authority, false),
                AccountMeta::new(*receiving_token_account, false),
                AccountMeta::new_readonly(spl_token::id(), false),
            ],
            remaining,
        )
    }

    pub fn update_interest_accumulator(
        program_id: &Pubkey,
        marginfi_group: &Pubkey,
        bank_vault: &Pubkey,
        bank_authority: &Pubkey,
        bank_fee_vault: &Pubkey,
    ) -> Instruction {
        instruction(
            program_id,
            "update_interest_accumulator",
            &[],
            vec![
                AccountMeta::new(*marginfi_group, false),
                AccountMeta::new(*bank_vault, false),
                AccountMeta::new_readonly(*bank_authority, false),
                AccountMeta::new(*bank_fee_vault, false),
                AccountMeta::new_readonly(spl_token::id(), false),
            ],
            vec![],
        )
    }

    /// The UTP index travels as a u64.
    pub fn deactivate_utp(
        program_id: &Pubkey,
        marginfi_account: &Pubkey,
        authority: &Pubkey,
        utp_index: u64,
        remaining: Vec<AccountMeta>,
    ) -> Instruction {
        instruction(
            program_id,
            "deactivate_utp",
            &utp_index.to_le_bytes(),
            vec![AccountMeta::new(*marginfi_account, false), AccountMeta::new_readonly(*authority, true)],
            remaining,
        )
    }

    pub fn handle_bankruptcy(
        program_id: &Pubkey,
        marginfi_account: &Pubkey,
        marginfi_group: &Pubkey,
        insurance_vault_authority: &Pubkey,
        insurance_vault: &Pubkey,
        liquidity_vault: &Pubkey,
        remaining: Vec<AccountMeta>,
    ) -> Instruction {
        instruction(
            program_id,
            "handle_bankruptcy",
            &[],
            vec![
                AccountMeta::new(*marginfi_account, false),
                AccountMeta::new(*marginfi_group, false),
                AccountMeta::new_readonly(*insurance_vault_authority, false),
                AccountMeta::new(*insurance_vault, false),
                AccountMeta::new(*liquidity_vault, false),
                AccountMeta::new_readonly(spl_token::id(), false),
            ],
            remaining,
        )
    }

    fn activate_args(authority_seed: &Pubkey, authority_bump: u8, extra: &[u8]) -> Vec<u8> {
        let mut args = Vec::with_capacity(33 + extra.len());
        args.extend_from_slice(authority_seed.as_ref());
        args.push(authority_bump);
        args.extend_from_slice(extra);
        args
    }

    pub struct MangoActivateAccounts {
        pub marginfi_account: Pubkey,
        pub marginfi_group: Pubkey,
        pub authority: Pubkey,
        pub mango_authority: Pubkey,
        pub mango_account: Pubkey,
        pub mango_program: Pubkey,
        pub mango_group: Pubkey,
    }

    pub fn utp_mango_activate(
        program_id: &Pubkey,
        a: &MangoActivateAccounts,
        authority_seed: &Pubkey,
        authority_bump: u8,
    ) -> Instruction {
        instruction(
            program_id,
            "utp_mango_activate",
            &activate_args(authority_seed, authority_bump, &[]),
            vec![
                AccountMeta::new(a.marginfi_account, false),
                AccountMeta::new_readonly(a.marginfi_group, false),
                AccountMeta::new(a.authority, true),
                AccountMeta::new(a.mango_authority, false),
                AccountMeta::new(a.mango_account, false),
                AccountMeta::new_readonly(a.mango_program, false),
                AccountMeta::new(a.mango_group, false),
                AccountMeta::new_readonly(system_program::id(), false),
            ],
            vec![],
        )
    }

    pub struct MangoTransferAccounts {
        pub marginfi_account: Pubkey,
        pub marginfi_group: Pubkey,
        pub signer: Pubkey,
        pub margin_collateral_vault: Pubkey,
        pub mango_authority: Pubkey,
        pub mango_account: Pubkey,
        pub mango_program: Pubkey,
        pub mango_group: Pubkey,
        pub mango_cache: Pubkey,
        pub mango_root_bank: Pubkey,
        pub mango_node_bank: Pubkey,
        pub mango_vault: Pubkey,
    }

    pub fn utp_mango_deposit(
        program_id: &Pubkey,
        a: &MangoTransferAccounts,
        bank_authority: &Pubkey,
        temp_collateral_account: &Pubkey,
        amount: u64,
        remaining: Vec<AccountMeta>,
    ) -> Instruction {
        instruction(
            program_id,
            "utp_mango_deposit",
            &amount.to_le_bytes(),
            vec![
                AccountMeta::new(a.marginfi_account, false),
                AccountMeta::new(a.marginfi_group, false),
                AccountMeta::new(a.signer, true),
                AccountMeta::new(a.margin_collateral_vault, false),
                AccountMeta::new_readonly(*bank_authority, false),
                AccountMeta::new(*temp_collateral_account, false),
                AccountMeta::new_readonly(a.mango_authority, false),
                AccountMeta::new(a.mango_account, false),
                AccountMeta::new_readonly(a.mango_program, false),
                AccountMeta::new_readonly(a.mango_group, false),
                AccountMeta::new(a.mango_cache, false),
                AccountMeta::new(a.mango_root_bank, false),
                AccountMeta::new(a.mango_node_bank, false),
                AccountMeta::new(a.mango_vault, false),
                AccountMeta::new_readonly(spl_token::id(), false),
            ],
            remaining,
        )
    }

    pub fn utp_mango_withdraw(
        program_id: &Pubkey,
        a: &MangoTransferAccounts,
        mango_vault_authority: &Pubkey,
        amount: u64,
        remaining: Vec<AccountMeta>,
    ) -> Instruction {
        instruction(
            program_id,
            "utp_mango_withdraw",
            &amount.to_le_bytes(),
            vec![
                AccountMeta::new(a.marginfi_account, false),
                AccountMeta::new(a.marginfi_group, false),
                AccountMeta::new_readonly(a.signer, true),
                AccountMeta::new(a.margin_collateral_vault, false),
                AccountMeta::new_readonly(a.mango_authority, false),
                AccountMeta::new(a.mango_account, false),
                AccountMeta::new_readonly(a.mango_program, false),
                AccountMeta::new_readonly(a.mango_group, false),
                AccountMeta::new_readonly(a.mango_cache, false),
                AccountMeta::new_readonly(a.mango_root_bank, false),
                AccountMeta::new(a.mango_node_bank, false),
                AccountMeta::new(a.mango_vault, false),
                AccountMeta::new_readonly(*mango_vault_authority, false),
                AccountMeta::new_readonly(spl_token::id(), false),
            ],
            remaining,
        )
    }

    pub struct ZoActivateAccounts {
        pub marginfi_account: Pubkey,
        pub marginfi_group: Pubkey,
        pub authority: Pubkey,
        pub utp_authority: Pubkey,
        pub zo_program: Pubkey,
        pub zo_state: Pubkey,
        pub zo_margin: Pubkey,
        pub zo_control: Pubkey,
    }

    pub fn utp_zo_activate(
        program_id: &Pubkey,
        a: &ZoActivateAccounts,
        authority_seed: &Pubkey,
        authority_bump: u8,
        zo_margin_nonce: u8,
    ) -> Instruction {
        instruction(
            program_id,
            "utp_zo_activate",
            &activate_args(authority_seed, authority_bump, &[zo_margin_nonce]),
            vec![
                AccountMeta::new(a.marginfi_account, false),
                AccountMeta::new_readonly(a.marginfi_group, false),
                AccountMeta::new(a.authority, true),
                AccountMeta::new_readonly(a.utp_authority, false),
                AccountMeta::new_readonly(a.zo_program, false),
                AccountMeta::new_readonly(a.zo_state, false),
                AccountMeta::new(a.zo_margin, false),
                AccountMeta::new(a.zo_control, false),
                AccountMeta::new_readonly(sysvar::rent::id(), false),
                AccountMeta::new_readonly(system_program::id(), false),
            ],
            vec![],
        )
    }

    pub struct ZoTransferAccounts {
        pub marginfi_account: Pubkey,
        pub marginfi_group: Pubkey,
        pub signer: Pubkey,
        pub margin_collateral_vault: Pubkey,
        pub utp_authority: Pubkey,
        pub zo_program: Pubkey,
        pub zo_state: Pubkey,
        pub zo_state_signer: Pubkey,
        pub zo_cache: Pubkey,
        pub zo_margin: Pubkey,
        pub zo_vault: Pubkey,
    }

    pub fn utp_zo_deposit(
        program_id: &Pubkey,
        a: &ZoTransferAccounts,
        bank_authority: &Pubkey,
        temp_collateral_account: &Pubkey,
        amount: u64,
        remaining: Vec<AccountMeta>,
    ) -> Instruction {
        instruction(
            program_id,
            "utp_zo_deposit",
            &amount.to_le_bytes(),
            vec![
                AccountMeta::new(a.marginfi_account, false),
                AccountMeta::new(a.marginfi_group, false),
                AccountMeta::new(a.signer, true),
                AccountMeta::new(a.margin_collateral_vault, false),
                AccountMeta::new_readonly(*bank_authority, false),
                AccountMeta::new(*temp_collateral_account, false),
                AccountMeta::new_readonly(a.utp_authority, false),
                AccountMeta::new_readonly(a.zo_program, false),
                AccountMeta::new_readonly(a.zo_state, false),
                AccountMeta::new_readonly(a.zo_state_signer, false),
                AccountMeta::new(a.zo_cache, false),
                AccountMeta::new(a.zo_margin, false),
                AccountMeta::new(a.zo_vault, false),
                AccountMeta::new_readonly(sysvar::rent::id(), false),
                AccountMeta::new_readonly(spl_token::id(), false),
                AccountMeta::new_readonly(system_program::id(), false),
            ],
            remaining,
        )
    }

    pub fn utp_zo_withdraw(
        program_id: &Pubkey,
        a: &ZoTransferAccounts,
        zo_control: &Pubkey,
        heimdall: &Pubkey,
        amount: u64,
        remaining: Vec<AccountMeta>,
    ) -> Instruction {
        instruction(
            program_id,
            "utp_zo_withdraw",
            &amount.to_le_bytes(),
            vec![
                AccountMeta::new(a.marginfi_account, false),
                AccountMeta::new(a.marginfi_group, false),
                AccountMeta::new_readonly(a.signer, true),
                AccountMeta::new(a.margin_collateral_vault, false),
                AccountMeta::new_readonly(a.utp_authority, false),
                AccountMeta::new(a.zo_margin, false),
                AccountMeta::new_readonly(a.zo_program, false),
                AccountMeta::new(a.zo_state, false),
                AccountMeta::new(a.zo_state_signer, false),
                AccountMeta::new(a.zo_cache, false),
                AccountMeta::new(*zo_control, false),
                AccountMeta::new(a.zo_vault, false),
                AccountMeta::new(*heimdall, false),
                AccountMeta::new_readonly(spl_token::id(), false),
            ],
            remaining,
        )
    }

    fn push_option<T>(data: &mut Vec<u8>, value: Option<T>, encode: impl FnOnce(&mut Vec<u8>, T)) {
        match value {
            Some(v) => {
                data.push(1);
                encode(data, v);
            }
            None => data.push(0),
        }
    }

    #[repr(u8)]
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum MangoSide {
        Bid = 0,
        Ask = 1,
    }

    #[repr(u8)]
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum MangoOrderType {
        Limit = 0,
        ImmediateOrCancel = 1,
        PostOnly = 2,
        Market = 3,
        PostOnlySlide = 4,
    }

    #[repr(u8)]
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum MangoExpiryType {
        Absolute = 0,
        Relative = 1,
    }

    /// Prices and quantities in Mango lots.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct MangoPlacePerpOrderArgs {
        pub side: MangoSide,
        pub price: i64,
        pub max_base_quantity: i64,
        pub max_quote_quantity: i64,
        pub client_order_id: u64,
        pub order_type: MangoOrderType,
        pub reduce_only: bool,
        pub expiry_timestamp: Option<u64>,
        pub limit: u8,
        pub expiry_type: MangoExpiryType,
    }

    impl MangoPlacePerpOrderArgs {
        pub fn pack(&self) -> Vec<u8> {
            let mut data = Vec::with_capacity(45);
            data.push(self.side as u8);
            data.extend_from_slice(&self.price.to_le_bytes());
            data.extend_from_slice(&self.max_base_quantity.to_le_bytes());
            data.extend_from_slice(&self.max_quote_quantity.to_le_bytes());
            data.extend_from_slice(&self.client_order_id.to_le_bytes());
            data.push(self.order_type as u8);
            data.push(self.reduce_only as u8);
            push_option(&mut data, self.expiry_timestamp, |d, t| d.extend_from_slice(&t.to_le_bytes()));
            data.push(self.limit);
            data.push(self.expiry_type as u8);
            data
        }
    }

    /// Accounts shared by the Mango order instructions. Cancel does not use
    /// `mango_cache` or `mango_event_queue`.
    pub struct MangoPerpOrderAccounts {
        pub marginfi_account: Pubkey,
        pub marginfi_group: Pubkey,
        pub signer: Pubkey,
        pub mango_authority: Pubkey,
        pub mango_account: Pubkey,
        pub mango_program: Pubkey,
        pub mango_group: Pubkey,
        pub mango_cache: Pubkey,
        pub mango_perp_market: Pubkey,
        pub mango_bids: Pubkey,
        pub mango_asks: Pubkey,
        pub mango_event_queue: Pubkey,
    }

    pub fn utp_mango_use_place_perp_order(
        program_id: &Pubkey,
        a: &MangoPerpOrderAccounts,
        args: &MangoPlacePerpOrderArgs,
        remaining: Vec<AccountMeta>,
    ) -> Instruction {
        instruction(
            program_id,
            "utp_mango_use_place_perp_order",
            &args.pack(),
            vec![
                AccountMeta::new_readonly(a.marginfi_account, false),
                AccountMeta::new_readonly(a.marginfi_group, false),
                AccountMeta::new(a.signer, true),
                AccountMeta::new_readonly(a.mango_authority, false),
                AccountMeta::new(a.mango_account, false),
                AccountMeta::new_readonly(a.mango_program, false),
                AccountMeta::new_readonly(a.mango_group, false),
                AccountMeta::new_readonly(a.mango_cache, false),
                AccountMeta::new(a.mango_perp_market, false),
                AccountMeta::new(a.mango_bids, false),
                AccountMeta::new(a.mango_asks, false),
                AccountMeta::new(a.mango_event_queue, false),
            ],
            remaining,
        )
    }

    pub fn utp_mango_use_cancel_perp_order(
        program_id: &Pubkey,
        a: &MangoPerpOrderAccounts,
        order_id: i128,
        invalid_id_ok: bool,
        remaining: Vec<AccountMeta>,
    ) -> Instruction {
        let mut args = Vec::with_capacity(17);
        args.extend_from_slice(&order_id.to_le_bytes());
        args.push(invalid_id_ok as u8);
        instruction(
            program_id,
            "utp_mango_use_cancel_perp_order",
            &args,
            vec![
                AccountMeta::new_readonly(a.marginfi_account, false),
                AccountMeta::new_readonly(a.marginfi_group, false),
                AccountMeta::new(a.signer, true),
                AccountMeta::new_readonly(a.mango_authority, false),
                AccountMeta::new(a.mango_account, false),
                AccountMeta::new_readonly(a.mango_program, false),
                AccountMeta::new_readonly(a.mango_group, false),
                AccountMeta::new(a.mango_perp_market, false),
                AccountMeta::new(a.mango_bids, false),
                AccountMeta::new(a.mango_asks, false),
            ],
            remaining,
        )
    }

    #[repr(u8)]
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum ZoOrderType {
        Limit = 0,
        ImmediateOrCancel = 1,
        PostOnly = 2,
        ReduceOnlyIoc = 3,
        ReduceOnlyLimit = 4,
        FillOrKill = 5,
    }

    /// Prices and quantities in 01 lots.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct ZoPlacePerpOrderArgs {
        pub is_long: bool,
        pub limit_price: u64,
        pub max_base_quantity: u64,
        pub max_quote_quantity: u64,
        pub order_type: ZoOrderType,
        pub limit: u16,
        pub client_id: u64,
    }

    impl ZoPlacePerpOrderArgs {
        pub fn pack(&self) -> Vec<u8> {
            let mut data = Vec::with_capacity(36);
            data.push(self.is_long as u8);
            data.extend_from_slice(&self.limit_price.to_le_bytes());
            data.extend_from_slice(&self.max_base_quantity.to_le_bytes());
            data.extend_from_slice(&self.max_quote_quantity.to_le_bytes());
            data.push(self.order_type as u8);
            data.extend_from_slice(&self.limit.to_le_bytes());
            data.extend_from_slice(&self.client_id.to_le_bytes());
            data
        }
    }

    /// Identifies the order by id, or by client id when `order_id` is `None`.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct ZoCancelPerpOrderArgs {
        pub order_id: Option<u128>,
        pub is_long: Option<bool>,
        pub client_id: Option<u64>,
    }

    impl ZoCancelPerpOrderArgs {
        pub fn pack(&self) -> Vec<u8> {
            let mut data = Vec::with_capacity(30);
            push_option(&mut data, self.order_id, |d, id| d.extend_from_slice(&id.to_le_bytes()));
            push_option(&mut data, self.is_long, |d, long| d.push(long as u8));
            push_option(&mut data, self.client_id, |d, id| d.extend_from_slice(&id.to_le_bytes()));
            data
        }
    }

    /// Accounts shared by the 01 order instructions; each builder picks the
    /// ones its instruction takes.
    pub struct ZoPerpOrderAccounts {
        pub marginfi_account: Pubkey,
        pub marginfi_group: Pubkey,
        pub signer: Pubkey,
        pub utp_authority: Pubkey,
        pub zo_program: Pubkey,
        pub state: Pubkey,
        pub state_signer: Pubkey,
        pub cache: Pubkey,
        pub margin: Pubkey,
        pub control: Pubkey,
        pub open_orders: Pubkey,
        pub dex_market: Pubkey,
        pub req_q: Pubkey,
        pub event_q: Pubkey,
        pub market_bids: Pubkey,
        pub market_asks: Pubkey,
        pub dex_program: Pubkey,
    }

    impl ZoPerpOrderAccounts {
        fn head(&self) -> Vec<AccountMeta> {
            vec![
                AccountMeta::new_readonly(self.marginfi_account, false),
                AccountMeta::new_readonly(self.marginfi_group, false),
                AccountMeta::new(self.signer, true),
                AccountMeta::new_readonly(self.utp_authority, false),
                AccountMeta::new_readonly(self.zo_program, false),
                AccountMeta::new_readonly(self.state, false),
            ]
        }
    }

    pub fn utp_zo_create_perp_open_orders(program_id: &Pubkey, a: &ZoPerpOrderAccounts) -> Instruction {
        let mut accounts = a.head();
        accounts.extend([
            AccountMeta::new(a.state_signer, false),
            AccountMeta::new(a.margin, false),
            AccountMeta::new(a.control, false),
            AccountMeta::new(a.open_orders, false),
            AccountMeta::new(a.dex_market, false),
            AccountMeta::new_readonly(a.dex_program, false),
            AccountMeta::new_readonly(sysvar::rent::id(), false),
            AccountMeta::new_readonly(system_program::id(), false),
        ]);
        instruction(program_id, "utp_zo_create_perp_open_orders", &[], accounts, vec![])
    }

    pub fn utp_zo_place_perp_order(
        program_id: &Pubkey,
        a: &ZoPerpOrderAccounts,
        args: &ZoPlacePerpOrderArgs,
        remaining: Vec<AccountMeta>,
    ) -> Instruction {
        let mut accounts = a.head();
        accounts.extend([
            AccountMeta::new(a.state_signer, false),
            AccountMeta::new(a.cache, false),
            AccountMeta::new(a.margin, false),
            AccountMeta::new(a.control, false),
            AccountMeta::new(a.open_orders, false),
            AccountMeta::new(a.dex_market, false),
            AccountMeta::new(a.req_q, false),
            AccountMeta::new(a.event_q, false),
            AccountMeta::new(a.market_bids, false),
            AccountMeta::new(a.market_asks, false),
            AccountMeta::new_readonly(a.dex_program, false),
            AccountMeta::new_readonly(sysvar::rent::id(), false),
        ]);
        instruction(program_id, "utp_zo_place_perp_order", &args.pack(), accounts, remaining)
    }

    pub fn utp_zo_cancel_perp_order(
        program_id: &Pubkey,
        a: &ZoPerpOrderAccounts,
        args: &ZoCancelPerpOrderArgs,
        remaining: Vec<AccountMeta>,
    ) -> Instruction {
        let mut accounts = a.head();
        accounts.extend([
            AccountMeta::new(a.cache, false),
            AccountMeta::new(a.margin, false),
            AccountMeta::new(a.control, false),
            AccountMeta::new(a.open_orders, false),
            AccountMeta::new(a.dex_market, false),
            AccountMeta::new(a.market_bids, false),
            AccountMeta::new(a.market_asks, false),
            AccountMeta::new(a.event_q, false),
            AccountMeta::new_readonly(a.dex_program, false),
        ]);
        instruction(program_id, "utp_zo_cancel_perp_order", &args.pack(), accounts, remaining)
    }

    pub fn utp_zo_settle_funds(program_id: &Pubkey, a: &ZoPerpOrderAccounts) -> Instruction {
        let mut accounts = a.head();
        accounts.extend([
            AccountMeta::new(a.state_signer, false),
            AccountMeta::new(a.cache, false),
            AccountMeta::new(a.margin, false),
            AccountMeta::new(a.control, false),
            AccountMeta::new(a.open_orders, false),
            AccountMeta::new(a.dex_market, false),
            AccountMeta::new_readonly(a.dex_program, false),
        ]);
        instruction(program_id, "utp_zo_settle_funds", &[], accounts, vec![])
    }
}

// 11. mod utp
pub mod utp {
    use log::{debug, warn};
    use solana_program::instruction::{AccountMeta, Instruction};
    use solana_program::program_pack::Pack;
    use solana_program::{pubkey::Pubkey, system_instruction};
    use solana_sdk::signature::{Keypair, Signature};
    use crate::account::MarginfiAccount;
    use crate::client::MarginfiClient;
    use crate::config::MarginfiConfig;
    use crate::error::{MarginfiError, Result};
    use crate::observation::{Cache, LiquidationPrices, UtpObservation};
    use crate::pda;
    use crate::provider::Provider;
    use crate::state::{UtpIndex, UTP_ADDRESS_BOOK_LEN};

    pub use mango::{MangoDecoder, MangoPerpMarket, MangoPlacePerpOrderOptions, UtpMangoAccount};
    pub use zo::{UtpZoAccount, ZoDecoder, ZoPerpMarket, ZoPlacePerpOrderOptions};

    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct UtpAccountConfig {
        pub address: Pubkey,
        pub authority_seed: Pubkey,
        pub authority_bump: u8,
        pub utp_address_book: [Pubkey; UTP_ADDRESS_BOOK_LEN],
    }

    /// One slot of the on-chain account's UTP tables.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct UtpData {
        pub is_active: bool,
        pub account_config: UtpAccountConfig,
    }

    /// Venue decoders, supplied by the caller.
    pub struct Decoders {
        pub mango: Box<dyn MangoDecoder>,
        pub zo: Box<dyn ZoDecoder>,
    }

    impl Decoders {
        pub fn new(mango: impl MangoDecoder + 'static, zo: impl ZoDecoder + 'static) -> Self {
            Self { mango: Box::new(mango), zo: Box::new(zo) }
        }
    }

    /// Instructions plus the extra keypairs that must sign them.
    #[derive(Debug, Default)]
    pub struct InstructionsWrapper {
        pub instructions: Vec<Instruction>,
        pub signers: Vec<Keypair>,
    }

    impl InstructionsWrapper {
        pub fn send<P: Provider + ?Sized>(&self, provider: &P) -> Result<Signature> {
            let signers: Vec<&Keypair> = self.signers.iter().collect();
            provider.send(&self.instructions, &signers)
        }
    }

    #[derive(Clone, Debug)]
    pub struct UtpState {
        index: UtpIndex,
        is_active: bool,
        config: UtpAccountConfig,
        cache: Cache<UtpObservation>,
    }

    impl UtpState {
        pub fn new(index: UtpIndex, data: UtpData) -> Self {
            Self { index, is_active: data.is_active, config: data.account_config, cache: Cache::EMPTY }
        }

        pub fn index(&self) -> UtpIndex {
            self.index
        }

        pub fn is_active(&self) -> bool {
            self.is_active
        }

        pub fn config(&self) -> &UtpAccountConfig {
            &self.config
        }

        pub fn observation(&self) -> &UtpObservation {
            self.cache.value()
        }

        pub fn cache(&self) -> &Cache<UtpObservation> {
            &self.cache
        }

        /// The cache is dropped once the slot is inactive or points at a
        /// different venue account.
        pub(crate) fn update(&mut self, data: UtpData) {
            if !data.is_active || data.account_config.address != self.config.address {
                self.cache = Cache::EMPTY;
            }
            self.is_active = data.is_active;
            self.config = data.account_config;
        }

        pub(crate) fn replace_observation(&mut self, observation: UtpObservation) {
            self.cache = Cache::observed(observation);
        }

        pub fn verify_active(&self) -> Result<()> {
            if !self.is_active {
                return Err(MarginfiError::UtpInactive(self.index));
            }
            Ok(())
        }
    }

    /// What each venue has to provide; [`UtpAccount`] dispatches to it.
    pub trait UtpCapability {
        fn state(&self) -> &UtpState;

        fn state_mut(&mut self) -> &mut UtpState;

        fn utp_program_id(&self, config: &MarginfiConfig) -> Pubkey;

        fn get_observation_accounts<P: Provider>(&self, client: &MarginfiClient<P>) -> Result<Vec<AccountMeta>>;

        /// Fetches and decodes the venue accounts without touching the cache.
        fn fetch_observation<P: Provider>(&self, client: &MarginfiClient<P>) -> Result<UtpObservation>;

        fn make_activate_ix<P: Provider>(
            &self,
            client: &MarginfiClient<P>,
            account: &MarginfiAccount,
        ) -> Result<InstructionsWrapper>;

        fn make_deposit_ix<P: Provider>(
            &self,
            client: &MarginfiClient<P>,
            account: &MarginfiAccount,
            ui_amount: f64,
        ) -> Result<InstructionsWrapper>;

        fn make_withdraw_ix<P: Provider>(
            &self,
            client: &MarginfiClient<P>,
            account: &MarginfiAccount,
            ui_amount: f64,
        ) -> Result<InstructionsWrapper>;

        fn config(&self) -> &UtpAccountConfig {
            self.state().config()
        }

        /// UTP authority PDA for `seed`, or for the stored seed when `None`.
        fn authority(&self, config: &MarginfiConfig, seed: Option<&Pubkey>) -> (Pubkey, u8) {
            let seed = seed.copied().unwrap_or(self.state().config().authority_seed);
            pda::utp_authority(&self.utp_program_id(config), &seed, &config.program_id)
        }
    }

    /// System account + spl-token init for a temporary collateral account
    /// owned by the UTP authority.
    pub fn make_create_proxy_token_account_ixs<P: Provider>(
        client: &MarginfiClient<P>,
        mint: &Pubkey,
        proxy_token_account: &Pubkey,
        utp_authority: &Pubkey,
    ) -> Result<Vec<Instruction>> {
        let provider = client.provider();
        let len = spl_token::state::Account::LEN;
        let lamports = provider.minimum_balance_for_rent_exemption(len)?;
        let create = system_instruction::create_account(
            &provider.wallet(),
            proxy_token_account,
            lamports,
            len as u64,
            &spl_token::id(),
        );
        let init = spl_token::instruction::initialize_account(&spl_token::id(), proxy_token_account, mint, utp_authority)?;
        Ok(vec![create, init])
    }

    macro_rules! dispatch {
        ($self:expr, $utp:ident => $body:expr) => {
            match $self {
                UtpAccount::Mango($utp) => $body,
                UtpAccount::Zo($utp) => $body,
            }
        };
    }

    #[derive(Clone, Debug)]
    pub enum UtpAccount {
        Mango(UtpMangoAccount),
        Zo(UtpZoAccount),
    }

    impl UtpAccount {
        pub fn new(index: UtpIndex, data: UtpData) -> Self {
            match index {
                UtpIndex::Mango => UtpAccount::Mango(UtpMangoAccount::new(data)),
                UtpIndex::Zo => UtpAccount::Zo(UtpZoAccount::new(data)),
            }
        }

        pub fn state(&self) -> &UtpState {
            dispatch!(self, utp => utp.state())
        }

        fn state_mut(&mut self) -> &mut UtpState {
            dispatch!(self, utp => utp.state_mut())
        }

        pub fn index(&self) -> UtpIndex {
            self.state().index()
        }

        pub fn is_active(&self) -> bool {
            self.state().is_active()
        }

        pub fn config(&self) -> &UtpAccountConfig {
            self.state().config()
        }

        pub fn address(&self) -> Pubkey {
            self.config().address
        }

        pub fn authority(&self, config: &MarginfiConfig, seed: Option<&Pubkey>) -> (Pubkey, u8) {
            dispatch!(self, utp => utp.authority(config, seed))
        }

        /// Last observation, without a staleness check.
        pub fn observation(&self) -> &UtpObservation {
            self.state().observation()
        }

        /// Last observation and its staleness at `now`; logs when stale.
        pub fn cached_observation(&self, now: i64) -> (UtpObservation, bool) {
            let cache = self.state().cache();
            let (observation, is_stale) = cache.get(now);
            if is_stale {
                warn!("last {} observation was fetched {}s ago", self.index(), cache.age(now));
            }
            (observation, is_stale)
        }

        pub fn equity(&self) -> f64 {
            self.observation().equity
        }

        pub fn free_collateral(&self) -> f64 {
            self.observation().free_collateral
        }

        pub fn init_margin_requirement(&self) -> f64 {
            self.observation().init_margin_requirement
        }

        pub fn liquidation_value(&self) -> f64 {
            self.observation().liquidation_value
        }

        pub fn is_rebalance_deposit_needed(&self) -> bool {
            self.observation().is_rebalance_deposit_needed
        }

        pub fn max_rebalance_deposit_amount(&self) -> f64 {
            self.observation().max_rebalance_deposit_amount
        }

        pub fn is_empty(&self) -> bool {
            self.observation().is_empty
        }

        pub fn compute_liquidation_prices(&self) -> LiquidationPrices {
            LiquidationPrices::from_liquidation_value(self.liquidation_value())
        }

        pub fn verify_active(&self) -> Result<()> {
            self.state().verify_active()
        }

        pub(crate) fn update(&mut self, data: UtpData) {
            self.state_mut().update(data)
        }

        pub fn get_observation_accounts<P: Provider>(&self, client: &MarginfiClient<P>) -> Result<Vec<AccountMeta>> {
            dispatch!(self, utp => utp.get_observation_accounts(client))
        }

        /// Refreshes the cached observation. The cache is only replaced after a
        /// complete fetch and decode.
        pub fn observe<P: Provider>(&mut self, client: &MarginfiClient<P>) -> Result<UtpObservation> {
            self.verify_active()?;
            debug!("observing {} UTP {}", self.index(), self.address());
            let observation = dispatch!(&*self, utp => utp.fetch_observation(client))?;
            self.state_mut().replace_observation(observation);
            Ok(observation)
        }

        pub fn make_activate_ix<P: Provider>(
            &self,
            client: &MarginfiClient<P>,
            account: &MarginfiAccount,
        ) -> Result<InstructionsWrapper> {
            dispatch!(self, utp => utp.make_activate_ix(client, account))
        }

        pub fn make_deposit_ix<P: Provider>(
            &self,
            client: &MarginfiClient<P>,
            account: &MarginfiAccount,
            ui_amount: f64,
        ) -> Result<InstructionsWrapper> {
            self.verify_active()?;
            dispatch!(self, utp => utp.make_deposit_ix(client, account, ui_amount))
        }

        pub fn make_withdraw_ix<P: Provider>(
            &self,
            client: &MarginfiClient<P>,
            account: &MarginfiAccount,
            ui_amount: f64,
        ) -> Result<InstructionsWrapper> {
            self.verify_active()?;
            dispatch!(self, utp => utp.make_withdraw_ix(client, account, ui_amount))
        }

        /// Moves collateral from the marginfi account into the venue. The
        /// caller reloads the account afterwards.
        pub fn deposit<P: Provider>(
            &self,
            client: &MarginfiClient<P>,
            account: &MarginfiAccount,
            ui_amount: f64,
        ) -> Result<Signature> {
            debug!("depositing {} into {} UTP", ui_amount, self.index());
            let sig = self.make_deposit_ix(client, account, ui_amount)?.send(client.provider())?;
            debug!("deposit successful: {}", sig);
            Ok(sig)
        }

        pub fn withdraw<P: Provider>(
            &self,
            client: &MarginfiClient<P>,
            account: &MarginfiAccount,
            ui_amount: f64,
        ) -> Result<Signature> {
            debug!("withdrawing {} from {} UTP", ui_amount, self.index());
            let sig = self.make_withdraw_ix(client, account, ui_amount)?.send(client.provider())?;
            debug!("withdrawal successful: {}", sig);
            Ok(sig)
        }
    }

    pub mod mango {
        use log::debug;
        use solana_program::instruction::AccountMeta;
        use solana_program::pubkey::Pubkey;
        use solana_sdk::signature::{Keypair, Signature};
        use solana_sdk::signer::Signer;
        use super::{make_create_proxy_token_account_ixs, InstructionsWrapper, UtpCapability, UtpData, UtpState};
        use crate::account::MarginfiAccount;
        use crate::bank::ui_to_native;
        use crate::client::MarginfiClient;
        use crate::config::MarginfiConfig;
        use crate::constants::{MANGO_ACCOUNT_NUMBER, MANGO_DEFAULT_ORDER_LIMIT};
        use crate::error::{MarginfiError, Result};
        use crate::ix::{
            self, MangoActivateAccounts, MangoExpiryType, MangoOrderType, MangoPerpOrderAccounts,
            MangoPlacePerpOrderArgs, MangoSide, MangoTransferAccounts,
        };
        use crate::observation::{RawObservation, UtpObservation};
        use crate::pda::{self, BankVaultType};
        use crate::provider::{fetch_accounts, Provider};
        use crate::state::UtpIndex;

        pub trait MangoDecoder {
            /// Risk metrics of a Mango account, in native collateral units.
            fn decode_observation(
                &self,
                mango_account: &[u8],
                mango_group: &[u8],
                mango_cache: &[u8],
                now: i64,
            ) -> Result<RawObservation>;
        }

        /// Addresses and lot sizes of one Mango perp market, as read from the
        /// venue by the caller.
        #[derive(Clone, Copy, Debug, PartialEq)]
        pub struct MangoPerpMarket {
            pub address: Pubkey,
            pub bids: Pubkey,
            pub asks: Pubkey,
            pub event_queue: Pubkey,
            pub base_decimals: u8,
            pub quote_decimals: u8,
            pub base_lot_size: i64,
            pub quote_lot_size: i64,
        }

        impl MangoPerpMarket {
            pub fn price_to_lots(&self, price: f64) -> i64 {
                let base_factor = 10f64.powi(self.base_decimals as i32);
                let quote_factor = 10f64.powi(self.quote_decimals as i32);
                ((price * quote_factor * self.base_lot_size as f64) / (self.quote_lot_size as f64 * base_factor)) as i64
            }

            pub fn base_to_lots(&self, quantity: f64) -> i64 {
                (quantity * 10f64.powi(self.base_decimals as i32) / self.base_lot_size as f64) as i64
            }

            pub fn quote_to_lots(&self, quantity: f64) -> i64 {
                (quantity * 10f64.powi(self.quote_decimals as i32) / self.quote_lot_size as f64) as i64
            }
        }

        /// Unset fields fall back to an immediate-or-cancel order with no
        /// quote cap.
        #[derive(Clone, Copy, Debug, Default, PartialEq)]
        pub struct MangoPlacePerpOrderOptions {
            pub max_quote_quantity: Option<f64>,
            pub limit: Option<u8>,
            pub order_type: Option<MangoOrderType>,
            pub client_order_id: Option<u64>,
            pub reduce_only: Option<bool>,
            pub expiry_timestamp: Option<u64>,
            pub expiry_type: Option<MangoExpiryType>,
        }

        fn positive(value: f64) -> Result<f64> {
            if !value.is_finite() || value <= 0.0 {
                return Err(MarginfiError::InvalidAmount(value));
            }
            Ok(value)
        }

        #[derive(Clone, Debug)]
        pub struct UtpMangoAccount {
            state: UtpState,
        }

        impl UtpMangoAccount {
            pub fn new(data: UtpData) -> Self {
                Self { state: UtpState::new(UtpIndex::Mango, data) }
            }

            fn transfer_accounts<P: Provider>(
                &self,
                client: &MarginfiClient<P>,
                account: &MarginfiAccount,
            ) -> Result<(MangoTransferAccounts, Pubkey)> {
                let config = client.config();
                let mango = &config.mango;
                let [root_bank, node_bank, vault, vault_signer] = mango.bank_accounts()?;
                let (mango_authority, _) = self.authority(config, None);
                let accounts = MangoTransferAccounts {
                    marginfi_account: account.pubkey(),
                    marginfi_group: config.group_pk,
                    signer: client.provider().wallet(),
                    margin_collateral_vault: account.group().bank.vault,
                    mango_authority,
                    mango_account: self.state.config().address,
                    mango_program: mango.program_id,
                    mango_group: mango.group_pk,
                    mango_cache: mango.cache()?,
                    mango_root_bank: root_bank,
                    mango_node_bank: node_bank,
                    mango_vault: vault,
                };
                Ok((accounts, vault_signer))
            }

            fn perp_order_accounts<P: Provider>(
                &self,
                client: &MarginfiClient<P>,
                account: &MarginfiAccount,
                market: &MangoPerpMarket,
            ) -> Result<MangoPerpOrderAccounts> {
                let config = client.config();
                let mango = &config.mango;
                let (mango_authority, _) = self.authority(config, None);
                Ok(MangoPerpOrderAccounts {
                    marginfi_account: account.pubkey(),
                    marginfi_group: config.group_pk,
                    signer: client.provider().wallet(),
                    mango_authority,
                    mango_account: self.state.config().address,
                    mango_program: mango.program_id,
                    mango_group: mango.group_pk,
                    mango_cache: mango.cache()?,
                    mango_perp_market: market.address,
                    mango_bids: market.bids,
                    mango_asks: market.asks,
                    mango_event_queue: market.event_queue,
                })
            }

            /// `price` and `quantity` in UI units, converted to market lots.
            pub fn make_place_perp_order_ix<P: Provider>(
                &self,
                client: &MarginfiClient<P>,
                account: &MarginfiAccount,
                market: &MangoPerpMarket,
                side: MangoSide,
                price: f64,
                quantity: f64,
                options: MangoPlacePerpOrderOptions,
            ) -> Result<InstructionsWrapper> {
                self.state.verify_active()?;
                let max_quote_quantity = match options.max_quote_quantity {
                    Some(max) => market.quote_to_lots(positive(max)?),
                    None => i64::MAX,
                };
                let args = MangoPlacePerpOrderArgs {
                    side,
                    price: market.price_to_lots(positive(price)?),
                    max_base_quantity: market.base_to_lots(positive(quantity)?),
                    max_quote_quantity,
                    client_order_id: options.client_order_id.unwrap_or(0),
                    order_type: options.order_type.unwrap_or(MangoOrderType::ImmediateOrCancel),
                    reduce_only: options.reduce_only.unwrap_or(false),
                    expiry_timestamp: options.expiry_timestamp,
                    limit: options.limit.unwrap_or(MANGO_DEFAULT_ORDER_LIMIT),
                    expiry_type: options.expiry_type.unwrap_or(MangoExpiryType::Absolute),
                };
                debug!("Mango perp order: {:?}", args);
                let accounts = self.perp_order_accounts(client, account, market)?;
                let remaining = account.get_observation_accounts(client)?;
                let place = ix::utp_mango_use_place_perp_order(&client.config().program_id, &accounts, &args, remaining);
                Ok(InstructionsWrapper { instructions: vec![place], signers: vec![] })
            }

            pub fn place_perp_order<P: Provider>(
                &self,
                client: &MarginfiClient<P>,
                account: &MarginfiAccount,
                market: &MangoPerpMarket,
                side: MangoSide,
                price: f64,
                quantity: f64,
                options: MangoPlacePerpOrderOptions,
            ) -> Result<Signature> {
                debug!("placing {:?} perp order on Mango market {}", side, market.address);
                let sig = self
                    .make_place_perp_order_ix(client, account, market, side, price, quantity, options)?
                    .send(client.provider())?;
                debug!("order placed: {}", sig);
                Ok(sig)
            }

            pub fn make_cancel_perp_order_ix<P: Provider>(
                &self,
                client: &MarginfiClient<P>,
                account: &MarginfiAccount,
                market: &MangoPerpMarket,
                order_id: i128,
                invalid_id_ok: bool,
            ) -> Result<InstructionsWrapper> {
                self.state.verify_active()?;
                let accounts = self.perp_order_accounts(client, account, market)?;
                let remaining = account.get_observation_accounts(client)?;
                let cancel = ix::utp_mango_use_cancel_perp_order(
                    &client.config().program_id,
                    &accounts,
                    order_id,
                    invalid_id_ok,
                    remaining,
                );
                Ok(InstructionsWrapper { instructions: vec![cancel], signers: vec![] })
            }

            pub fn cancel_perp_order<P: Provider>(
                &self,
                client: &MarginfiClient<P>,
                account: &MarginfiAccount,
                market: &MangoPerpMarket,
                order_id: i128,
                invalid_id_ok: bool,
            ) -> Result<Signature> {
                debug!("cancelling Mango perp order {} on {}", order_id, market.address);
                let sig = self
                    .make_cancel_perp_order_ix(client, account, market, order_id, invalid_id_ok)?
                    .send(client.provider())?;
                debug!("order cancelled: {}", sig);
                Ok(sig)
            }
        }

        impl UtpCapability for UtpMangoAccount {
            fn state(&self) -> &UtpState {
                &self.state
            }

            fn state_mut(&mut self) -> &mut UtpState {
                &mut self.state
            }

            fn utp_program_id(&self, config: &MarginfiConfig) -> Pubkey {
                config.mango.program_id
            }

            fn get_observation_accounts<P: Provider>(&self, client: &MarginfiClient<P>) -> Result<Vec<AccountMeta>> {
                let mango = &client.config().mango;
                Ok(vec![
                    AccountMeta::new_readonly(self.state.config().address, false),
                    AccountMeta::new_readonly(mango.group_pk, false),
                    AccountMeta::new_readonly(mango.cache()?, false),
                ])
            }

            fn fetch_observation<P: Provider>(&self, client: &MarginfiClient<P>) -> Result<UtpObservation> {
                let mango = &client.config().mango;
                let keys = [self.state.config().address, mango.group_pk, mango.cache()?];
                let data = fetch_accounts(client.provider(), &keys, &["Mango account", "Mango group", "Mango cache"])?;
                let now = client.provider().unix_timestamp();
                let raw = client.decoders().mango.decode_observation(&data[0], &data[1], &data[2], now)?;
                Ok(UtpObservation::from_raw(&raw))
            }

            fn make_activate_ix<P: Provider>(
                &self,
                client: &MarginfiClient<P>,
                account: &MarginfiAccount,
            ) -> Result<InstructionsWrapper> {
                let config = client.config();
                let wallet = client.provider().wallet();
                let authority_seed = Keypair::new().pubkey();
                let (mango_authority, authority_bump) = self.authority(config, Some(&authority_seed));
                let (mango_account, _) = pda::mango_account_address(
                    &config.mango.program_id,
                    &config.mango.group_pk,
                    &mango_authority,
                    MANGO_ACCOUNT_NUMBER,
                );
                let activate = ix::utp_mango_activate(
                    &config.program_id,
                    &MangoActivateAccounts {
                        marginfi_account: account.pubkey(),
                        marginfi_group: config.group_pk,
                        authority: wallet,
                        mango_authority,
                        mango_account,
                        mango_program: config.mango.program_id,
                        mango_group: config.mango.group_pk,
                    },
                    &authority_seed,
                    authority_bump,
                );
                Ok(InstructionsWrapper { instructions: vec![activate], signers: vec![] })
            }

            fn make_deposit_ix<P: Provider>(
                &self,
                client: &MarginfiClient<P>,
                account: &MarginfiAccount,
                ui_amount: f64,
            ) -> Result<InstructionsWrapper> {
                let amount = ui_to_native(ui_amount)?;
                let config = client.config();
                let proxy = Keypair::new();
                let (accounts, _) = self.transfer_accounts(client, account)?;
                let (bank_authority, _) =
                    pda::bank_authority(&config.group_pk, &config.program_id, BankVaultType::LiquidityVault);
                let mut instructions = make_create_proxy_token_account_ixs(
                    client,
                    &account.group().bank.mint,
                    &proxy.pubkey(),
                    &accounts.mango_authority,
                )?;
                let remaining = account.get_observation_accounts(client)?;
                instructions.push(ix::utp_mango_deposit(
                    &config.program_id,
                    &accounts,
                    &bank_authority,
                    &proxy.pubkey(),
                    amount,
                    remaining,
                ));
                Ok(InstructionsWrapper { instructions, signers: vec![proxy] })
            }

            fn make_withdraw_ix<P: Provider>(
                &self,
                client: &MarginfiClient<P>,
                account: &MarginfiAccount,
                ui_amount: f64,
            ) -> Result<InstructionsWrapper> {
                let amount = ui_to_native(ui_amount)?;
                let (accounts, vault_signer) = self.transfer_accounts(client, account)?;
                let remaining = account.get_observation_accounts(client)?;
                let withdraw = ix::utp_mango_withdraw(
                    &client.config().program_id,
                    &accounts,
                    &vault_signer,
                    amount,
                    remaining,
                );
                Ok(InstructionsWrapper { instructions: vec![withdraw], signers: vec![] })
            }
        }
    }

    pub mod zo {
        use log::debug;
        use solana_program::instruction::AccountMeta;
        use solana_program::pubkey::Pubkey;
        use solana_program::system_instruction;
        use solana_sdk::compute_budget::ComputeBudgetInstruction;
        use solana_sdk::signature::{Keypair, Signature};
        use solana_sdk::signer::Signer;
        use super::{make_create_proxy_token_account_ixs, InstructionsWrapper, UtpCapability, UtpData, UtpState};
        use crate::account::MarginfiAccount;
        use crate::bank::ui_to_native;
        use crate::client::MarginfiClient;
        use crate::config::MarginfiConfig;
        use crate::constants::{ZO_CONTROL_ACCOUNT_LEN, ZO_DEFAULT_ORDER_LIMIT, ZO_PLACE_ORDER_COMPUTE_UNITS};
        use crate::error::{MarginfiError, Result};
        use crate::ix::{
            self, ZoActivateAccounts, ZoCancelPerpOrderArgs, ZoOrderType, ZoPerpOrderAccounts, ZoPlacePerpOrderArgs,
            ZoTransferAccounts,
        };
        use crate::observation::{RawObservation, UtpObservation};
        use crate::pda::{self, BankVaultType};
        use crate::provider::{fetch_accounts, Provider};
        use crate::state::UtpIndex;

        pub trait ZoDecoder {
            /// Control account referenced by a 01 margin account.
            fn control_key(&self, margin: &[u8]) -> Result<Pubkey>;

            /// Risk metrics of a 01 margin account, in native collateral units.
            fn decode_observation(
                &self,
                margin: &[u8],
                control: &[u8],
                state: &[u8],
                cache: &[u8],
                now: i64,
            ) -> Result<RawObservation>;
        }

        /// Addresses and lot sizes of one 01 perp market, as read from the
        /// venue by the caller.
        #[derive(Clone, Copy, Debug, PartialEq)]
        pub struct ZoPerpMarket {
            pub dex_market: Pubkey,
            pub req_q: Pubkey,
            pub event_q: Pubkey,
            pub bids: Pubkey,
            pub asks: Pubkey,
            pub base_decimals: u8,
            pub quote_decimals: u8,
            pub base_lot_size: u64,
            pub quote_lot_size: u64,
            /// Taker fee rate of the market's perp type.
            pub taker_fee: f64,
        }

        impl ZoPerpMarket {
            pub fn price_to_lots(&self, price: f64) -> u64 {
                let decimals = self.quote_decimals as i32 - self.base_decimals as i32;
                (price * self.base_lot_size as f64 / self.quote_lot_size as f64 * 10f64.powi(decimals)).round() as u64
            }

            pub fn size_to_lots(&self, size: f64) -> u64 {
                (size * 10f64.powi(self.base_decimals as i32)).round() as u64 / self.base_lot_size.max(1)
            }

            /// Quote lots covering `max_base_quantity` at `limit_price`, fee included.
            pub fn max_quote_quantity(&self, is_long: bool, limit_price: u64, max_base_quantity: u64) -> u64 {
                let fee_multiplier = if is_long { 1.0 + self.taker_fee } else { 1.0 - self.taker_fee };
                (limit_price as f64 * fee_multiplier * max_base_quantity as f64 * self.quote_lot_size as f64).round() as u64
            }
        }

        #[derive(Clone, Copy, Debug, PartialEq, Eq)]
        pub struct ZoPlacePerpOrderOptions {
            pub limit: u16,
            pub client_id: u64,
        }

        impl Default for ZoPlacePerpOrderOptions {
            fn default() -> Self {
                Self { limit: ZO_DEFAULT_ORDER_LIMIT, client_id: 0 }
            }
        }

        #[derive(Clone, Debug)]
        pub struct UtpZoAccount {
            state: UtpState,
        }

        impl UtpZoAccount {
            pub fn new(data: UtpData) -> Self {
                Self { state: UtpState::new(UtpIndex::Zo, data) }
            }

            /// Control account named by the margin account; one round trip.
            pub fn control_address<P: Provider>(&self, client: &MarginfiClient<P>) -> Result<Pubkey> {
                let margin = self.state.config().address;
                let data = fetch_accounts(client.provider(), &[margin], &["01 margin"])?;
                client.decoders().zo.control_key(&data[0])
            }

            /// Observation accounts for an already known control key.
            pub(crate) fn observation_metas<P: Provider>(
                &self,
                client: &MarginfiClient<P>,
                control: &Pubkey,
            ) -> Result<Vec<AccountMeta>> {
                let zo = &client.config().zo;
                Ok(vec![
                    AccountMeta::new_readonly(self.state.config().address, false),
                    AccountMeta::new_readonly(*control, false),
                    AccountMeta::new_readonly(zo.state_pk, false),
                    AccountMeta::new_readonly(zo.cache()?, false),
                ])
            }

            fn perp_order_accounts<P: Provider>(
                &self,
                client: &MarginfiClient<P>,
                account: &MarginfiAccount,
                market: &ZoPerpMarket,
                control: Pubkey,
            ) -> Result<ZoPerpOrderAccounts> {
                let config = client.config();
                let zo = &config.zo;
                let (utp_authority, _) = self.authority(config, None);
                let (open_orders, _) = pda::zo_open_orders_address(&zo.dex_program, &control, &market.dex_market);
                Ok(ZoPerpOrderAccounts {
                    marginfi_account: account.pubkey(),
                    marginfi_group: config.group_pk,
                    signer: client.provider().wallet(),
                    utp_authority,
                    zo_program: zo.program_id,
                    state: zo.state_pk,
                    state_signer: zo.state_signer()?,
                    cache: zo.cache()?,
                    margin: self.state.config().address,
                    control,
                    open_orders,
                    dex_market: market.dex_market,
                    req_q: market.req_q,
                    event_q: market.event_q,
                    market_bids: market.bids,
                    market_asks: market.asks,
                    dex_program: zo.dex_program,
                })
            }

            pub fn make_create_perp_open_orders_ix<P: Provider>(
                &self,
                client: &MarginfiClient<P>,
                account: &MarginfiAccount,
                market: &ZoPerpMarket,
            ) -> Result<InstructionsWrapper> {
                self.state.verify_active()?;
                let control = self.control_address(client)?;
                let accounts = self.perp_order_accounts(client, account, market, control)?;
                let create = ix::utp_zo_create_perp_open_orders(&client.config().program_id, &accounts);
                Ok(InstructionsWrapper { instructions: vec![create], signers: vec![] })
            }

            pub fn create_perp_open_orders<P: Provider>(
                &self,
                client: &MarginfiClient<P>,
                account: &MarginfiAccount,
                market: &ZoPerpMarket,
            ) -> Result<Signature> {
                debug!("creating 01 open orders on {}", market.dex_market);
                let sig = self.make_create_perp_open_orders_ix(client, account, market)?.send(client.provider())?;
                debug!("open orders created: {}", sig);
                Ok(sig)
            }

            /// `price` and `size` in UI units. Requests extra compute units
            /// ahead of the order instruction.
            pub fn make_place_perp_order_ix<P: Provider>(
                &self,
                client: &MarginfiClient<P>,
                account: &MarginfiAccount,
                market: &ZoPerpMarket,
                order_type: ZoOrderType,
                is_long: bool,
                price: f64,
                size: f64,
                options: ZoPlacePerpOrderOptions,
            ) -> Result<InstructionsWrapper> {
                self.state.verify_active()?;
                for value in [price, size] {
                    if !value.is_finite() || value <= 0.0 {
                        return Err(MarginfiError::InvalidAmount(value));
                    }
                }
                let limit_price = market.price_to_lots(price);
                let max_base_quantity = market.size_to_lots(size);
                let args = ZoPlacePerpOrderArgs {
                    is_long,
                    limit_price,
                    max_base_quantity,
                    max_quote_quantity: market.max_quote_quantity(is_long, limit_price, max_base_quantity),
                    order_type,
                    limit: options.limit,
                    client_id: options.client_id,
                };
                debug!("01 perp order: {:?}", args);
                let control = self.control_address(client)?;
                let accounts = self.perp_order_accounts(client, account, market, control)?;
                let remaining = account.get_observation_accounts_with_zo_control(client, &control)?;
                let request_units = ComputeBudgetInstruction::set_compute_unit_limit(ZO_PLACE_ORDER_COMPUTE_UNITS);
                let place = ix::utp_zo_place_perp_order(&client.config().program_id, &accounts, &args, remaining);
                Ok(InstructionsWrapper { instructions: vec![request_units, place], signers: vec![] })
            }

            pub fn place_perp_order<P: Provider>(
                &self,
                client: &MarginfiClient<P>,
                account: &MarginfiAccount,
                market: &ZoPerpMarket,
                order_type: ZoOrderType,
                is_long: bool,
                price: f64,
                size: f64,
                options: ZoPlacePerpOrderOptions,
            ) -> Result<Signature> {
                debug!("placing perp order on 01 market {}", market.dex_market);
                let sig = self
                    .make_place_perp_order_ix(client, account, market, order_type, is_long, price, size, options)?
                    .send(client.provider())?;
                debug!("order placed: {}", sig);
                Ok(sig)
            }

            pub fn make_cancel_perp_order_ix<P: Provider>(
                &self,
                client: &MarginfiClient<P>,
                account: &MarginfiAccount,
                market: &ZoPerpMarket,
                args: ZoCancelPerpOrderArgs,
            ) -> Result<InstructionsWrapper> {
                self.state.verify_active()?;
                let control = self.control_address(client)?;
                let accounts = self.perp_order_accounts(client, account, market, control)?;
                let remaining = account.get_observation_accounts_with_zo_control(client, &control)?;
                let cancel = ix::utp_zo_cancel_perp_order(&client.config().program_id, &accounts, &args, remaining);
                Ok(InstructionsWrapper { instructions: vec![cancel], signers: vec![] })
            }

            pub fn cancel_perp_order<P: Provider>(
                &self,
                client: &MarginfiClient<P>,
                account: &MarginfiAccount,
                market: &ZoPerpMarket,
                args: ZoCancelPerpOrderArgs,
            ) -> Result<Signature> {
                debug!("cancelling 01 perp order {:?} on {}", args, market.dex_market);
                let sig = self.make_cancel_perp_order_ix(client, account, market, args)?.send(client.provider())?;
                debug!("order cancelled: {}", sig);
                Ok(sig)
            }

            pub fn make_settle_funds_ix<P: Provider>(
                &self,
                client: &MarginfiClient<P>,
                account: &MarginfiAccount,
                market: &ZoPerpMarket,
            ) -> Result<InstructionsWrapper> {
                self.state.verify_active()?;
                let control = self.control_address(client)?;
                let accounts = self.perp_order_accounts(client, account, market, control)?;
                let settle = ix::utp_zo_settle_funds(&client.config().program_id, &accounts);
                Ok(InstructionsWrapper { instructions: vec![settle], signers: vec![] })
            }

            pub fn settle_funds<P: Provider>(
                &self,
                client: &MarginfiClient<P>,
                account: &MarginfiAccount,
                market: &ZoPerpMarket,
            ) -> Result<Signature> {
                debug!("settling 01 funds on {}", market.dex_market);
                let sig = self.make_settle_funds_ix(client, account, market)?.send(client.provider())?;
                debug!("funds settled: {}", sig);
                Ok(sig)
            }

            fn transfer_accounts<P: Provider>(
                &self,
                client: &MarginfiClient<P>,
                account: &MarginfiAccount,
            ) -> Result<ZoTransferAccounts> {
                let config = client.config();
                let zo = &config.zo;
                let [state_signer, vault] = zo.vault_accounts()?;
                let (utp_authority, _) = self.authority(config, None);
                Ok(ZoTransferAccounts {
                    marginfi_account: account.pubkey(),
                    marginfi_group: config.group_pk,
                    signer: client.provider().wallet(),
                    margin_collateral_vault: account.group().bank.vault,
                    utp_authority,
                    zo_program: zo.program_id,
                    zo_state: zo.state_pk,
                    zo_state_signer: state_signer,
                    zo_cache: zo.cache()?,
                    zo_margin: self.state.config().address,
                    zo_vault: vault,
                })
            }
        }

        impl UtpCapability for UtpZoAccount {
            fn state(&self) -> &UtpState {
                &self.state
            }

            fn state_mut(&mut self) -> &mut UtpState {
                &mut self.state
            }

            fn utp_program_id(&self, config: &MarginfiConfig) -> Pubkey {
                config.zo.program_id
            }

            fn get_observation_accounts<P: Provider>(&self, client: &MarginfiClient<P>) -> Result<Vec<AccountMeta>> {
                let control = self.control_address(client)?;
                self.observation_metas(client, &control)
            }

            /// The control key lives in the margin account, so it takes a
            /// second round trip after the margin/state/cache fetch.
            fn fetch_observation<P: Provider>(&self, client: &MarginfiClient<P>) -> Result<UtpObservation> {
                let zo = &client.config().zo;
                let decoder = &client.decoders().zo;
                let keys = [self.state.config().address, zo.state_pk, zo.cache()?];
                let data = fetch_accounts(client.provider(), &keys, &["01 margin", "01 state", "01 cache"])?;
                let control_key = decoder.control_key(&data[0])?;
                let control = fetch_accounts(client.provider(), &[control_key], &["01 control"])?;
                let now = client.provider().unix_timestamp();
                let raw = decoder.decode_observation(&data[0], &control[0], &data[1], &data[2], now)?;
                Ok(UtpObservation::from_raw(&raw))
            }

            fn make_activate_ix<P: Provider>(
                &self,
                client: &MarginfiClient<P>,
                account: &MarginfiAccount,
            ) -> Result<InstructionsWrapper> {
                let config = client.config();
                let provider = client.provider();
                let wallet = provider.wallet();
                let control = Keypair::new();
                let lamports = provider.minimum_balance_for_rent_exemption(ZO_CONTROL_ACCOUNT_LEN)?;
                let create_control = system_instruction::create_account(
                    &wallet,
                    &control.pubkey(),
                    lamports,
                    ZO_CONTROL_ACCOUNT_LEN as u64,
                    &config.zo.program_id,
                );
                let authority_seed = Keypair::new().pubkey();
                let (utp_authority, authority_bump) = self.authority(config, Some(&authority_seed));
                let (zo_margin, margin_nonce) =
                    pda::zo_margin_address(&config.zo.program_id, &utp_authority, &config.zo.state_pk);
                let activate = ix::utp_zo_activate(
                    &config.program_id,
                    &ZoActivateAccounts {
                        marginfi_account: account.pubkey(),
                        marginfi_group: config.group_pk,
                        authority: wallet,
                        utp_authority,
                        zo_program: config.zo.program_id,
                        zo_state: config.zo.state_pk,
                        zo_margin,
                        zo_control: control.pubkey(),
                    },
                    &authority_seed,
                    authority_bump,
                    margin_nonce,
                );
                Ok(InstructionsWrapper { instructions: vec![create_control, activate], signers: vec![control] })
            }

            fn make_deposit_ix<P: Provider>(
                &self,
                client: &MarginfiClient<P>,
                account: &MarginfiAccount,
                ui_amount: f64,
            ) -> Result<InstructionsWrapper> {
                let amount = ui_to_native(ui_amount)?;
                let config = client.config();
                let proxy = Keypair::new();
                let accounts = self.transfer_accounts(client, account)?;
                let (bank_authority, _) =
                    pda::bank_authority(&config.group_pk, &config.program_id, BankVaultType::LiquidityVault);
                let mut instructions = make_create_proxy_token_account_ixs(
                    client,
                    &account.group().bank.mint,
                    &proxy.pubkey(),
                    &accounts.utp_authority,
                )?;
                let remaining = account.get_observation_accounts(client)?;
                instructions.push(ix::utp_zo_deposit(
                    &config.program_id,
                    &accounts,
                    &bank_authority,
                    &proxy.pubkey(),
                    amount,
                    remaining,
                ));
                Ok(InstructionsWrapper { instructions, signers: vec![proxy] })
            }

            fn make_withdraw_ix<P: Provider>(
                &self,
                client: &MarginfiClient<P>,
                account: &MarginfiAccount,
                ui_amount: f64,
            ) -> Result<InstructionsWrapper> {
                let amount = ui_to_native(ui_amount)?;
                let config = client.config();
                let accounts = self.transfer_accounts(client, account)?;
                let control = self.control_address(client)?;
                let remaining = account.get_observation_accounts_with_zo_control(client, &control)?;
                let withdraw = ix::utp_zo_withdraw(
                    &config.program_id,
                    &accounts,
                    &control,
                    &config.zo.heimdall,
                    amount,
                    remaining,
                );
                Ok(InstructionsWrapper { instructions: vec![withdraw], signers: vec![] })
            }
        }
    }
}

// 12. mod account
pub mod account {
    use fixed::types::I80F48;
    use log::{debug, error, info};
    use solana_program::instruction::{AccountMeta, Instruction};
    use solana_program::pubkey::Pubkey;
    use solana_sdk::signature::Signature;
    use std::collections::BTreeMap;
    use crate::bank::{native_to_ui, ui_to_native, BankSide, MarginRequirement};
    use crate::client::MarginfiClient;
    use crate::config::MarginfiConfig;
    use crate::constants::REBALANCE_DEPOSIT_FRACTION;
    use crate::error::{MarginfiError, Result};
    use crate::group::MarginfiGroup;
    use crate::ix;
    use crate::observation::{LiquidationPrices, UtpObservation};
    use crate::pda::{associated_token_address, bank_authority, BankVaultType};
    use crate::provider::{fetch_accounts, Provider};
    use crate::state::{read_account, MarginfiAccountState, UtpIndex};
    use crate::utp::{UtpAccount, UtpAccountConfig, UtpData, UtpMangoAccount, UtpZoAccount};

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum EquityType {
        /// Counts each UTP's free collateral.
        InitReqAdjusted,
        /// Counts each UTP's full equity.
        Total,
    }

    #[derive(Clone, Copy, Debug, PartialEq)]
    pub struct AccountBalances {
        pub equity: f64,
        pub assets: f64,
        pub liabilities: f64,
    }

    #[derive(Clone, Debug, PartialEq)]
    pub struct AccountLiquidationPrices {
        /// Maintenance health.
        pub health: f64,
        pub utps: BTreeMap<UtpIndex, LiquidationPrices>,
    }

    fn utp_data(state: &MarginfiAccountState, index: UtpIndex) -> UtpData {
        let slot = index.slot();
        let config = &state.utp_account_config[slot];
        UtpData {
            is_active: state.active_utps[slot] != 0,
            account_config: UtpAccountConfig {
                address: Pubkey::new_from_array(config.address),
                authority_seed: Pubkey::new_from_array(config.authority_seed),
                authority_bump: config.authority_bump,
                utp_address_book: config.utp_address_book.map(Pubkey::new_from_array),
            },
        }
    }

    fn check_group(config: &MarginfiConfig, state: &MarginfiAccountState) -> Result<()> {
        let found = Pubkey::new_from_array(state.marginfi_group);
        if found != config.group_pk {
            return Err(MarginfiError::GroupMismatch { expected: config.group_pk, found });
        }
        Ok(())
    }

    /// Group and account in one round trip, so neither is read against a
    /// different slot than the other.
    fn load_group_and_account_data<P: Provider + ?Sized>(
        provider: &P,
        group_pk: &Pubkey,
        account_pk: &Pubkey,
    ) -> Result<(Vec<u8>, Vec<u8>)> {
        let mut data = fetch_accounts(provider, &[*group_pk, *account_pk], &["marginfi group", "marginfi account"])?;
        let account = data.pop().ok_or(MarginfiError::AccountNotFound(*account_pk))?;
        let group = data.pop().ok_or(MarginfiError::AccountNotFound(*group_pk))?;
        Ok((group, account))
    }

    #[derive(Clone, Debug)]
    pub struct MarginfiAccount {
        pubkey: Pubkey,
        authority: Pubkey,
        group: MarginfiGroup,
        deposit_record: I80F48,
        borrow_record: I80F48,
        utps: Vec<UtpAccount>,
    }

    impl MarginfiAccount {
        pub fn fetch<P: Provider>(pubkey: Pubkey, client: &MarginfiClient<P>) -> Result<Self> {
            debug!("loading marginfi account {}", pubkey);
            let config = client.config();
            let (group_data, account_data) =
                load_group_and_account_data(client.provider(), &config.group_pk, &pubkey)?;
            let account = Self::from_account_data_raw(pubkey, config, &account_data, &group_data)?;
            info!("marginfi account {} loaded", pubkey);
            Ok(account)
        }

        pub fn from_account_data(
            pubkey: Pubkey,
            config: &MarginfiConfig,
            state: &MarginfiAccountState,
            group: MarginfiGroup,
        ) -> Result<Self> {
            check_group(config, state)?;
            Ok(Self {
                pubkey,
                authority: Pubkey::new_from_array(state.authority),
                group,
                deposit_record: state.deposit_record.into(),
                borrow_record: state.borrow_record.into(),
                utps: UtpIndex::ALL.iter().map(|&i| UtpAccount::new(i, utp_data(state, i))).collect(),
            })
        }

        pub fn from_account_data_raw(
            pubkey: Pubkey,
            config: &MarginfiConfig,
            account_data: &[u8],
            group_data: &[u8],
        ) -> Result<Self> {
            let state = read_account(account_data)?;
            let group = MarginfiGroup::from_account_data_raw(config, group_data)?;
            Self::from_account_data(pubkey, config, &state, group)
        }

        pub fn pubkey(&self) -> Pubkey {
            self.pubkey
        }

        pub fn authority(&self) -> Pubkey {
            self.authority
        }

        pub fn group(&self) -> &MarginfiGroup {
            &self.group
        }

        pub fn deposit_record(&self) -> I80F48 {
            self.deposit_record
        }

        pub fn borrow_record(&self) -> I80F48 {
            self.borrow_record
        }

        /// Deposits in UI units.
        pub fn deposits(&self) -> f64 {
            native_to_ui(self.group.bank.compute_native_amount(self.deposit_record, BankSide::Deposit))
        }

        /// Borrows in UI units.
        pub fn borrows(&self) -> f64 {
            native_to_ui(self.group.bank.compute_native_amount(self.borrow_record, BankSide::Borrow))
        }

        pub fn all_utps(&self) -> &[UtpAccount] {
            &self.utps
        }

        pub fn active_utps(&self) -> Vec<&UtpAccount> {
            self.utps.iter().filter(|utp| utp.is_active()).collect()
        }

        pub fn utp(&self, index: UtpIndex) -> &UtpAccount {
            &self.utps[index.slot()]
        }

        pub fn utp_mut(&mut self, index: UtpIndex) -> &mut UtpAccount {
            &mut self.utps[index.slot()]
        }

        pub fn mango(&self) -> Result<&UtpMangoAccount> {
            match self.utp(UtpIndex::Mango) {
                UtpAccount::Mango(utp) => Ok(utp),
                other => Err(MarginfiError::UnsupportedUtp(other.index() as u8)),
            }
        }

        pub fn zo(&self) -> Result<&UtpZoAccount> {
            match self.utp(UtpIndex::Zo) {
                UtpAccount::Zo(utp) => Ok(utp),
                other => Err(MarginfiError::UnsupportedUtp(other.index() as u8)),
            }
        }

        pub fn observation_cache(&self) -> BTreeMap<UtpIndex, UtpObservation> {
            self.utps.iter().map(|utp| (utp.index(), *utp.observation())).collect()
        }

        /// Nothing is replaced unless the group and the account both decode
        /// and validate.
        pub fn reload<P: Provider>(&mut self, client: &MarginfiClient<P>, observe_utps: bool) -> Result<()> {
            debug!("reloading marginfi account {}", self.pubkey);
            let config = client.config();
            let (group_data, account_data) =
                load_group_and_account_data(client.provider(), &config.group_pk, &self.pubkey)?;
            let group = MarginfiGroup::from_account_data_raw(config, &group_data)?;
            let state = read_account(&account_data)?;
            check_group(config, &state)?;

            self.group = group;
            self.authority = Pubkey::new_from_array(state.authority);
            self.deposit_record = state.deposit_record.into();
            self.borrow_record = state.borrow_record.into();
            for utp in self.utps.iter_mut() {
                let data = utp_data(&state, utp.index());
                utp.update(data);
            }

            if observe_utps {
                self.observe_utps(client)?;
            }
            Ok(())
        }

        /// One fetch per active UTP; a failing UTP leaves the others' caches
        /// as they were observed.
        pub fn observe_utps<P: Provider>(
            &mut self,
            client: &MarginfiClient<P>,
        ) -> Result<BTreeMap<UtpIndex, UtpObservation>> {
            debug!("observing UTP accounts of {}", self.pubkey);
            let mut observations = BTreeMap::new();
            for utp in self.utps.iter_mut().filter(|utp| utp.is_active()) {
                let observation = utp.observe(client)?;
                observations.insert(utp.index(), observation);
            }
            Ok(observations)
        }

        /// Active UTPs' observation accounts, concatenated in index order.
        pub fn get_observation_accounts<P: Provider>(&self, client: &MarginfiClient<P>) -> Result<Vec<AccountMeta>> {
            let mut accounts = Vec::new();
            for utp in self.active_utps() {
                accounts.extend(utp.get_observation_accounts(client)?);
            }
            debug!("loaded {} observation accounts", accounts.len());
            Ok(accounts)
        }

        /// [`Self::get_observation_accounts`] with the 01 control key already
        /// in hand, so the margin account is not fetched again.
        pub(crate) fn get_observation_accounts_with_zo_control<P: Provider>(
            &self,
            client: &MarginfiClient<P>,
            zo_control: &Pubkey,
        ) -> Result<Vec<AccountMeta>> {
            let mut accounts = Vec::new();
            for utp in self.active_utps() {
                match utp {
                    UtpAccount::Zo(zo) => accounts.extend(zo.observation_metas(client, zo_control)?),
                    other => accounts.extend(other.get_observation_accounts(client)?),
                }
            }
            Ok(accounts)
        }

        pub fn compute_balances(&self, equity_type: EquityType) -> AccountBalances {
            let mut assets = self.deposits();
            for utp in self.active_utps() {
                assets += match equity_type {
                    EquityType::InitReqAdjusted => utp.free_collateral(),
                    EquityType::Total => utp.equity(),
                };
            }
            let liabilities = self.borrows();
            AccountBalances { equity: assets - liabilities, assets, liabilities }
        }

        pub fn compute_margin_requirement(&self, kind: MarginRequirement) -> Result<f64> {
            Ok(self.borrows() * self.group.bank.compute_margin_ratio(kind)?)
        }

        /// Init-requirement-adjusted equity over the `kind` requirement;
        /// `+inf` when nothing is borrowed.
        pub fn compute_health(&self, kind: MarginRequirement) -> Result<f64> {
            let requirement = self.compute_margin_requirement(kind)?;
            if requirement == 0.0 {
                return Ok(f64::INFINITY);
            }
            Ok(self.compute_balances(EquityType::InitReqAdjusted).equity / requirement)
        }

        /// Init-requirement-adjusted equity over liabilities; `+inf` without
        /// liabilities.
        pub fn margin_ratio(&self) -> f64 {
            let balances = self.compute_balances(EquityType::InitReqAdjusted);
            if balances.liabilities > 0.0 {
                balances.equity / balances.liabilities
            } else {
                f64::INFINITY
            }
        }

        pub fn compute_liquidation_prices(&self) -> Result<AccountLiquidationPrices> {
            Ok(AccountLiquidationPrices {
                health: self.compute_health(MarginRequirement::Maint)?,
                utps: self
                    .active_utps()
                    .into_iter()
                    .map(|utp| (utp.index(), utp.compute_liquidation_prices()))
                    .collect(),
            })
        }

        pub fn make_deposit_ix<P: Provider>(&self, client: &MarginfiClient<P>, ui_amount: f64) -> Result<Instruction> {
            let amount = ui_to_native(ui_amount)?;
            let config = client.config();
            let wallet = client.provider().wallet();
            let funding_account = associated_token_address(&wallet, &self.group.bank.mint);
            let remaining = self.get_observation_accounts(client)?;
            Ok(ix::margin_deposit_collateral(
                &config.program_id,
                &self.pubkey,
                &config.group_pk,
                &wallet,
                &funding_account,
                &self.group.bank.vault,
                amount,
                remaining,
            ))
        }

        pub fn deposit<P: Provider>(&mut self, client: &MarginfiClient<P>, ui_amount: f64) -> Result<Signature> {
            debug!("depositing {} into marginfi account {}", ui_amount, self.pubkey);
            let ix = self.make_deposit_ix(client, ui_amount)?;
            let sig = client.provider().send(&[ix], &[])?;
            debug!("deposit successful: {}", sig);
            self.reload(client, false)?;
            Ok(sig)
        }

        pub fn make_withdraw_ix<P: Provider>(&self, client: &MarginfiClient<P>, ui_amount: f64) -> Result<Instruction> {
            let amount = ui_to_native(ui_amount)?;
            let config = client.config();
            let wallet = client.provider().wallet();
            let receiving_account = associated_token_address(&wallet, &self.group.bank.mint);
            let (bank_authority, _) = bank_authority(&config.group_pk, &config.program_id, BankVaultType::LiquidityVault);
            let remaining = self.get_observation_accounts(client)?;
            Ok(ix::margin_withdraw_collateral(
                &config.program_id,
                &self.pubkey,
                &config.group_pk,
                &wallet,
                &self.group.bank.vault,
                &bank_authority,
                &receiving_account,
                amount,
                remaining,
            ))
        }

        pub fn withdraw<P: Provider>(&mut self, client: &MarginfiClient<P>, ui_amount: f64) -> Result<Signature> {
            debug!("withdrawing {} from marginfi account {}", ui_amount, self.pubkey);
            let ix = self.make_withdraw_ix(client, ui_amount)?;
            let sig = client.provider().send(&[ix], &[])?;
            debug!("withdrawal successful: {}", sig);
            self.reload(client, false)?;
            Ok(sig)
        }

        pub fn make_deactivate_utp_ix<P: Provider>(
            &self,
            client: &MarginfiClient<P>,
            index: UtpIndex,
        ) -> Result<Instruction> {
            self.utp(index).verify_active()?;
            let remaining = self.get_observation_accounts(client)?;
            Ok(ix::deactivate_utp(
                &client.config().program_id,
                &self.pubkey,
                &client.provider().wallet(),
                index as u64,
                remaining,
            ))
        }

        /// Rejected on-chain while the venue position is not empty.
        pub fn deactivate_utp<P: Provider>(&mut self, client: &MarginfiClient<P>, index: UtpIndex) -> Result<Signature> {
            debug!("deactivating {} UTP of {}", index, self.pubkey);
            let ix = self.make_deactivate_utp_ix(client, index)?;
            let sig = client.provider().send(&[ix], &[])?;
            debug!("deactivation successful: {}", sig);
            self.reload(client, false)?;
            Ok(sig)
        }

        pub fn make_handle_bankruptcy_ix<P: Provider>(&self, client: &MarginfiClient<P>) -> Result<Instruction> {
            let config = client.config();
            let (insurance_vault_authority, _) =
                bank_authority(&config.group_pk, &config.program_id, BankVaultType::InsuranceVault);
            let remaining = self.get_observation_accounts(client)?;
            Ok(ix::handle_bankruptcy(
                &config.program_id,
                &self.pubkey,
                &config.group_pk,
                &insurance_vault_authority,
                &self.group.bank.insurance_vault,
                &self.group.bank.vault,
                remaining,
            ))
        }

        pub fn handle_bankruptcy<P: Provider>(&mut self, client: &MarginfiClient<P>) -> Result<Signature> {
            debug!("handling bankruptcy of {}", self.pubkey);
            let ix = self.make_handle_bankruptcy_ix(client)?;
            let sig = client.provider().send(&[ix], &[])?;
            debug!("bankruptcy handled: {}", sig);
            self.reload(client, false)?;
            Ok(sig)
        }

        pub fn activate_utp<P: Provider>(&mut self, client: &MarginfiClient<P>, index: UtpIndex) -> Result<Signature> {
            debug!("activating {} UTP of {}", index, self.pubkey);
            let sig = {
                let account: &Self = self;
                account.utp(index).make_activate_ix(client, account)?.send(client.provider())?
            };
            debug!("activation successful: {}", sig);
            self.reload(client, false)?;
            Ok(sig)
        }

        pub fn utp_deposit<P: Provider>(
            &mut self,
            client: &MarginfiClient<P>,
            index: UtpIndex,
            ui_amount: f64,
        ) -> Result<Signature> {
            let sig = {
                let account: &Self = self;
                account.utp(index).deposit(client, account, ui_amount)?
            };
            self.reload(client, false)?;
            Ok(sig)
        }

        pub fn utp_withdraw<P: Provider>(
            &mut self,
            client: &MarginfiClient<P>,
            index: UtpIndex,
            ui_amount: f64,
        ) -> Result<Signature> {
            let sig = {
                let account: &Self = self;
                account.utp(index).withdraw(client, account, ui_amount)?
            };
            self.reload(client, false)?;
            Ok(sig)
        }

        /// Tops up every active UTP whose last observation asks for it, with
        /// 95% of the advertised maximum. A failing UTP is logged and skipped.
        pub fn rebalance_deposits<P: Provider>(&mut self, client: &MarginfiClient<P>) -> Vec<(UtpIndex, Signature)> {
            let targets: Vec<(UtpIndex, f64)> = self
                .active_utps()
                .into_iter()
                .filter(|utp| utp.is_rebalance_deposit_needed())
                .map(|utp| (utp.index(), utp.max_rebalance_deposit_amount() * REBALANCE_DEPOSIT_FRACTION))
                .collect();

            let mut signatures = Vec::with_capacity(targets.len());
            for (index, amount) in targets {
                match self.utp_deposit(client, index, amount) {
                    Ok(sig) => signatures.push((index, sig)),
                    Err(e) => error!("rebalance deposit of {} into {} UTP failed: {}", amount, index, e),
                }
            }
            signatures
        }
    }
}

// 13. mod client
pub mod client {
    use log::{debug, info};
    use solana_program::{pubkey::Pubkey, system_instruction};
    use solana_sdk::signature::{Keypair, Signature, Signer};
    use crate::account::MarginfiAccount;
    use crate::config::MarginfiConfig;
    use crate::constants::ACCOUNT_LEN;
    use crate::error::Result;
    use crate::group::MarginfiGroup;
    use crate::ix;
    use crate::provider::Provider;
    use crate::utp::{Decoders, InstructionsWrapper};

    /// Entry point: configuration, transport, venue decoders and the loaded group.
    pub struct MarginfiClient<P: Provider> {
        config: MarginfiConfig,
        provider: P,
        decoders: Decoders,
        group: MarginfiGroup,
    }

    impl<P: Provider> MarginfiClient<P> {
        pub fn fetch(config: MarginfiConfig, provider: P, decoders: Decoders) -> Result<Self> {
            debug!("loading marginfi client for group {}", config.group_pk);
            let group = MarginfiGroup::fetch(&config, &provider)?;
            Ok(Self { config, provider, decoders, group })
        }

        pub fn config(&self) -> &MarginfiConfig {
            &self.config
        }

        pub fn provider(&self) -> &P {
            &self.provider
        }

        pub fn decoders(&self) -> &Decoders {
            &self.decoders
        }

        pub fn group(&self) -> &MarginfiGroup {
            &self.group
        }

        pub fn program_id(&self) -> Pubkey {
            self.config.program_id
        }

        pub fn reload_group(&mut self) -> Result<()> {
            self.group.reload(&self.config, &self.provider)
        }

        pub fn make_create_marginfi_account_ixs(&self, account: Keypair) -> Result<InstructionsWrapper> {
            let wallet = self.provider.wallet();
            let lamports = self.provider.minimum_balance_for_rent_exemption(ACCOUNT_LEN)?;
            let create = system_instruction::create_account(
                &wallet,
                &account.pubkey(),
                lamports,
                ACCOUNT_LEN as u64,
                &self.config.program_id,
            );
            let init = ix::init_marginfi_account(&self.config.program_id, &self.config.group_pk, &account.pubkey(), &wallet);
            Ok(InstructionsWrapper { instructions: vec![create, init], signers: vec![account] })
        }

        pub fn create_marginfi_account(&self) -> Result<(MarginfiAccount, Signature)> {
            let account = Keypair::new();
            let pubkey = account.pubkey();
            let sig = self.make_create_marginfi_account_ixs(account)?.send(&self.provider)?;
            info!("created marginfi account {}: {}", pubkey, sig);
            let account = MarginfiAccount::fetch(pubkey, self)?;
            Ok((account, sig))
        }

        pub fn load_marginfi_account(&self, pubkey: Pubkey) -> Result<MarginfiAccount> {
            MarginfiAccount::fetch(pubkey, self)
        }
    }
}

pub use account::{AccountBalances, AccountLiquidationPrices, EquityType, MarginfiAccount};
pub use bank::{Bank, BankSide, MarginRequirement};
pub use client::MarginfiClient;
pub use config::{Environment, MangoConfig, MarginfiConfig, ZoConfig};
pub use error::{MarginfiError, Result};
pub use group::MarginfiGroup;
pub use observation::{Cache, LiquidationPrices, RawObservation, UtpObservation, EMPTY_OBSERVATION};
pub use provider::Provider;
pub use state::UtpIndex;
pub use utp::{
    Decoders, InstructionsWrapper, MangoDecoder, MangoPerpMarket, MangoPlacePerpOrderOptions, UtpAccount,
    UtpCapability, UtpMangoAccount, UtpZoAccount, ZoDecoder, ZoPerpMarket, ZoPlacePerpOrderOptions,
};
