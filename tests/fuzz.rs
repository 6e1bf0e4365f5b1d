use bytemuck::Zeroable;
use fixed::types::I80F48;
use marginfi_client::{
    bank::{BankSide, MarginRequirement},
    constants::{ACCOUNT_LEN, GROUP_LEN},
    observation::RawObservation,
    state::{self, MarginfiAccountState, MarginfiGroupState, WrappedI80F48},
    Decoders, Environment, EquityType, LiquidationPrices, MangoDecoder, MarginfiClient, MarginfiConfig,
    Provider, UtpIndex, ZoDecoder, EMPTY_OBSERVATION,
};
use rand::{Rng, SeedableRng};
use rand_xorshift::XorShiftRng;
use solana_program::{instruction::Instruction, pubkey::Pubkey};
use solana_sdk::signature::{Keypair, Signature};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

struct Ledger {
    wallet: Pubkey,
    accounts: RefCell<HashMap<Pubkey, Vec<u8>>>,
}

impl Provider for Ledger {
    fn wallet(&self) -> Pubkey {
        self.wallet
    }

    fn get_multiple_accounts_data(&self, pubkeys: &[Pubkey]) -> marginfi_client::Result<Vec<Option<Vec<u8>>>> {
        let accounts = self.accounts.borrow();
        Ok(pubkeys.iter().map(|pk| accounts.get(pk).cloned()).collect())
    }

    fn minimum_balance_for_rent_exemption(&self, _len: usize) -> marginfi_client::Result<u64> {
        Ok(0)
    }

    fn send(&self, _: &[Instruction], _: &[&Keypair]) -> marginfi_client::Result<Signature> {
        Ok(Signature::default())
    }

    fn unix_timestamp(&self) -> i64 {
        1_650_000_000
    }
}

#[derive(Clone)]
struct SharedObservation(Rc<Cell<RawObservation>>);

impl MangoDecoder for SharedObservation {
    fn decode_observation(&self, _: &[u8], _: &[u8], _: &[u8], _: i64) -> marginfi_client::Result<RawObservation> {
        Ok(self.0.get())
    }
}

struct SharedZo(SharedObservation, Pubkey);

impl ZoDecoder for SharedZo {
    fn control_key(&self, _: &[u8]) -> marginfi_client::Result<Pubkey> {
        Ok(self.1)
    }

    fn decode_observation(&self, _: &[u8], _: &[u8], _: &[u8], _: &[u8], _: i64) -> marginfi_client::Result<RawObservation> {
        Ok(self.0 .0.get())
    }
}

fn random_raw(rng: &mut XorShiftRng) -> RawObservation {
    let equity = rng.gen_range(0.0..1e12);
    let free_collateral = equity * rng.gen_range(0.0..1.0);
    RawObservation {
        timestamp: 0,
        equity,
        free_collateral,
        init_margin_requirement: equity - free_collateral,
        liquidation_value: rng.gen_range(0.0..1e12),
        is_rebalance_deposit_needed: rng.gen_bool(0.2),
        max_rebalance_deposit_amount: rng.gen_range(0.0..1e9),
        is_empty: false,
    }
}

fn wrapped(v: f64) -> WrappedI80F48 {
    I80F48::from_num(v).into()
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1.0)
}

#[test]
fn deterministic_fuzz_valuation() {
    let seed = [0xabu8; 16];
    let mut rng = XorShiftRng::from_seed(seed);

    let mango_cache = Pubkey::new_unique();
    let zo_cache = Pubkey::new_unique();
    let config = MarginfiConfig::new(Environment::Localnet);
    let mango = config.mango.clone().with_group_accounts(
        mango_cache,
        Pubkey::new_unique(),
        Pubkey::new_unique(),
        Pubkey::new_unique(),
        Pubkey::new_unique(),
    );
    let zo = config.zo.clone().with_state_accounts(zo_cache, Pubkey::new_unique(), Pubkey::new_unique());
    let config = config.with_mango(mango).with_zo(zo);

    let account_pk = Pubkey::new_unique();
    let mango_account = Pubkey::new_unique();
    let zo_margin = Pubkey::new_unique();
    let zo_control = Pubkey::new_unique();

    let mut group = MarginfiGroupState::zeroed();
    group.bank.mint = config.collateral_mint_pk.to_bytes();
    group.bank.deposit_accumulator = wrapped(1.0);
    group.bank.borrow_accumulator = wrapped(1.0);
    group.bank.init_margin_ratio = wrapped(1.2);
    group.bank.maint_margin_ratio = wrapped(1.1);

    let mut account = MarginfiAccountState::zeroed();
    account.marginfi_group = config.group_pk.to_bytes();
    account.utp_account_config[0].address = mango_account.to_bytes();
    account.utp_account_config[1].address = zo_margin.to_bytes();

    let ledger = Ledger { wallet: Pubkey::new_unique(), accounts: RefCell::new(HashMap::new()) };
    let write = |ledger: &Ledger, group: &MarginfiGroupState, account: &MarginfiAccountState| {
        let mut g = vec![0u8; GROUP_LEN];
        state::write_group(&mut g, group);
        let mut a = vec![0u8; ACCOUNT_LEN];
        state::write_account(&mut a, account);
        let mut accounts = ledger.accounts.borrow_mut();
        accounts.insert(config.group_pk, g);
        accounts.insert(account_pk, a);
    };
    write(&ledger, &group, &account);
    {
        let mut accounts = ledger.accounts.borrow_mut();
        for pk in [mango_account, config.mango.group_pk, mango_cache, zo_margin, zo_control, config.zo.state_pk, zo_cache] {
            accounts.insert(pk, vec![0; 8]);
        }
    }

    let mango_obs = SharedObservation(Rc::new(Cell::new(EMPTY_OBSERVATION_RAW)));
    let zo_obs = SharedObservation(Rc::new(Cell::new(EMPTY_OBSERVATION_RAW)));
    let decoders = Decoders::new(mango_obs.clone(), SharedZo(zo_obs.clone(), zo_control));
    let client = MarginfiClient::fetch(config.clone(), ledger, decoders).unwrap();
    let mut marginfi_account = client.load_marginfi_account(account_pk).unwrap();

    for i in 0..500 {
        group.bank.deposit_accumulator = wrapped(rng.gen_range(1.0..3.0));
        group.bank.borrow_accumulator = wrapped(rng.gen_range(1.0..3.0));
        account.deposit_record = wrapped(rng.gen_range(0.0..1e12));
        account.borrow_record = if rng.gen_bool(0.3) { wrapped(0.0) } else { wrapped(rng.gen_range(0.0..1e12)) };
        account.active_utps[0] = rng.gen_bool(0.5) as u8;
        account.active_utps[1] = rng.gen_bool(0.5) as u8;
        mango_obs.0.set(random_raw(&mut rng));
        zo_obs.0.set(random_raw(&mut rng));
        write(client.provider(), &group, &account);

        marginfi_account.reload(&client, true).unwrap();

        let deposits = marginfi_account.deposits();
        let borrows = marginfi_account.borrows();
        let bank = &marginfi_account.group().bank;
        assert!(close(deposits * 1e6, bank.compute_native_amount(marginfi_account.deposit_record(), BankSide::Deposit)));

        let mut free_collateral = 0.0;
        let mut equity = 0.0;
        for utp in marginfi_account.all_utps() {
            if utp.is_active() {
                free_collateral += utp.free_collateral();
                equity += utp.equity();
            } else {
                assert_eq!(*utp.observation(), EMPTY_OBSERVATION, "inactive {} observed at step {}", utp.index(), i);
            }
        }

        let adjusted = marginfi_account.compute_balances(EquityType::InitReqAdjusted);
        assert!(close(adjusted.assets, deposits + free_collateral), "assets mismatch at step {}", i);
        assert_eq!(adjusted.equity, adjusted.assets - adjusted.liabilities);
        let total = marginfi_account.compute_balances(EquityType::Total);
        assert!(close(total.equity, deposits + equity - borrows), "equity mismatch at step {}", i);

        let health = marginfi_account.compute_health(MarginRequirement::Maint).unwrap();
        let margin_ratio = marginfi_account.margin_ratio();
        if borrows == 0.0 {
            assert_eq!(health, f64::INFINITY);
            assert_eq!(margin_ratio, f64::INFINITY);
        } else {
            let requirement = marginfi_account.compute_margin_requirement(MarginRequirement::Maint).unwrap();
            assert!(close(requirement, borrows * 1.1));
            assert!(close(health, adjusted.equity / requirement), "health mismatch at step {}", i);
            assert!(close(margin_ratio, adjusted.equity / borrows), "margin ratio mismatch at step {}", i);
        }

        let prices = marginfi_account.compute_liquidation_prices().unwrap();
        let active: Vec<UtpIndex> = marginfi_account.active_utps().iter().map(|utp| utp.index()).collect();
        assert_eq!(prices.utps.keys().copied().collect::<Vec<_>>(), active);
        for (index, p) in &prices.utps {
            let liquidation_value = marginfi_account.utp(*index).liquidation_value();
            let liquidator_fee = liquidation_value - p.discounted_liquidator_price;
            assert!(close(p.final_price + liquidator_fee + p.insurance_vault_fee, liquidation_value));
            assert_eq!(*p, LiquidationPrices::from_liquidation_value(liquidation_value));
        }
    }
}

const EMPTY_OBSERVATION_RAW: RawObservation = RawObservation {
    timestamp: 0,
    equity: 0.0,
    free_collateral: 0.0,
    init_margin_requirement: 0.0,
    liquidation_value: 0.0,
    is_rebalance_deposit_needed: false,
    max_rebalance_deposit_amount: 0.0,
    is_empty: false,
};
