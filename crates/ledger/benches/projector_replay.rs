use chrono::Utc;
use criterion::{Criterion, criterion_group, criterion_main};

use keel_core::TenantId;
use keel_ledger::{
    Account, AccountKind, AccountRef, LedgerEntry, LineDraft, Partner, PartnerKind, RateTable,
    Side, TransactionDraft, TransactionType, project,
};

fn build_log(
    tenant: TenantId,
    accounts: &[Account],
    partners: &[Partner],
    transactions: usize,
) -> Vec<LedgerEntry> {
    let rates = RateTable::new("USD");
    let mut entries = Vec::with_capacity(transactions * 2);
    for i in 0..transactions {
        let debit = AccountRef::Account(accounts[i % accounts.len()].id);
        let credit = AccountRef::Partner(partners[i % partners.len()].id);
        let amount = (i % 997 + 1) as f64;
        let batch = TransactionDraft::new(TransactionType::Sale, format!("INV-{i}"), Utc::now())
            .line(LineDraft::new(debit, "debit", Side::Debit, amount))
            .line(LineDraft::new(credit, "credit", Side::Credit, amount))
            .realize(tenant, &rates)
            .expect("balanced draft");
        entries.extend(batch);
    }
    entries
}

fn bench_full_replay(c: &mut Criterion) {
    let tenant = TenantId::new();
    let accounts: Vec<Account> = (0..50)
        .map(|i| Account::new(tenant, format!("{}", 1000 + i), format!("Account {i}"), AccountKind::Asset))
        .collect();
    let partners: Vec<Partner> = (0..50)
        .map(|i| Partner::new(tenant, format!("CUST-{i}"), format!("Partner {i}"), PartnerKind::Customer))
        .collect();

    for size in [1_000usize, 10_000] {
        let entries = build_log(tenant, &accounts, &partners, size);
        c.bench_function(&format!("full_replay_{size}_transactions"), |b| {
            b.iter(|| project(&entries, &accounts, &partners))
        });
    }
}

criterion_group!(benches, bench_full_replay);
criterion_main!(benches);
