//! Shared tests for ExchangeRateRepo implementations

use chrono::{Duration, Utc};
use rust_decimal::dec;

use crate::db::repos::ExchangeRateRepo;

pub async fn test_no_rate_recorded(repo: &dyn ExchangeRateRepo) {
    assert!(repo.effective_at(Utc::now()).await.unwrap().is_none());
}

pub async fn test_latest_effective_rate_wins(repo: &dyn ExchangeRateRepo) {
    let now = Utc::now();
    repo.record(dec!(900), now - Duration::days(2)).await.unwrap();
    repo.record(dec!(1000), now - Duration::days(1)).await.unwrap();

    let rate = repo.effective_at(now).await.unwrap().unwrap();
    assert_eq!(rate.points_per_unit, dec!(1000));
}

pub async fn test_future_rate_not_yet_in_force(repo: &dyn ExchangeRateRepo) {
    let now = Utc::now();
    repo.record(dec!(1000), now - Duration::hours(1)).await.unwrap();
    repo.record(dec!(2000), now + Duration::days(1)).await.unwrap();

    let rate = repo.effective_at(now).await.unwrap().unwrap();
    assert_eq!(rate.points_per_unit, dec!(1000));
    assert_eq!(repo.list(10).await.unwrap().len(), 2);
}

mod sqlite_tests {
    use crate::db::{
        sqlite::SqliteExchangeRateRepo,
        tests::harness::{create_sqlite_pool, run_sqlite_migrations},
    };

    async fn create_repo() -> SqliteExchangeRateRepo {
        let pool = create_sqlite_pool().await;
        run_sqlite_migrations(&pool).await;
        SqliteExchangeRateRepo::new(pool)
    }

    macro_rules! sqlite_test {
        ($name:ident) => {
            #[tokio::test]
            async fn $name() {
                let repo = create_repo().await;
                super::$name(&repo).await;
            }
        };
    }

    sqlite_test!(test_no_rate_recorded);
    sqlite_test!(test_latest_effective_rate_wins);
    sqlite_test!(test_future_rate_not_yet_in_force);
}
