use sqlx::SqlitePool;

use crate::models::{Account, Visit};
use crate::services::reports::{self, PersonInBuilding};

/// Checks everyone in. When nobody holds the key, the first of them who is
/// eligible becomes keyholder. Returns the active keyholder's barcode, empty
/// when there is none.
pub async fn checkin(pool: &SqlitePool, check_ins: &[String]) -> Result<String, sqlx::Error> {
    let mut current = Account::get_active_key_holder(pool)
        .await?
        .map(|kh| kh.barcode)
        .unwrap_or_default();

    for barcode in check_ins {
        Visit::check_in_member(pool, barcode).await?;

        if current.is_empty() && Account::set_key_holder_active(pool, barcode).await? {
            current = barcode.clone();
        }
    }

    Ok(current)
}

/// Checks out everyone except the current keyholder, who has to stay until
/// relieved. Returns the keyholder's barcode when they asked to leave, empty
/// otherwise.
pub async fn checkout(
    pool: &SqlitePool,
    current_keyholder: &str,
    check_outs: &[String],
) -> Result<String, sqlx::Error> {
    let mut leaving_keyholder = String::new();

    for barcode in check_outs {
        if !current_keyholder.is_empty() && barcode == current_keyholder {
            leaving_keyholder = current_keyholder.to_string();
        } else {
            Visit::check_out_member(pool, barcode).await?;
        }
    }

    Ok(leaving_keyholder)
}

pub async fn bulk_checkout(
    pool: &SqlitePool,
    check_ins: &[String],
    check_outs: &[String],
) -> Result<String, sqlx::Error> {
    let current_keyholder = checkin(pool, check_ins).await?;
    checkout(pool, &current_keyholder, check_outs).await
}

/// Closes the building behind the departing keyholder.
pub async fn close_building(pool: &SqlitePool, keyholder: &str) -> Result<(), sqlx::Error> {
    Visit::empty_building(pool, keyholder).await?;
    Account::inactivate_all_key_holders(pool).await?;
    Ok(())
}

/// What the station should do after a scan.
#[derive(Debug)]
pub enum ScanOutcome {
    /// Everyone scanned was toggled; `errors` lists unknown barcodes.
    Updated { errors: Vec<String> },
    /// The keyholder, or the master card, was scanned with others present.
    ShowKeyholder { who_is_here: Vec<PersonInBuilding> },
    /// The keyholder was the last one in and has left.
    Closed,
}

/// Handles a scan at the main station. The input may carry several barcodes
/// separated by whitespace.
pub async fn scan(pool: &SqlitePool, master_barcode: &str, input: &str) -> Result<ScanOutcome, sqlx::Error> {
    let mut current = Account::get_active_key_holder(pool)
        .await?
        .map(|kh| kh.barcode)
        .unwrap_or_default();
    let mut errors = Vec::new();

    for barcode in input.split_whitespace() {
        let is_keyholder = !current.is_empty() && barcode == current;

        if barcode == master_barcode || is_keyholder {
            let who_is_here = reports::who_is_here(pool).await?;

            if is_keyholder && who_is_here.len() == 1 {
                close_building(pool, barcode).await?;
                return Ok(ScanOutcome::Closed);
            }

            return Ok(ScanOutcome::ShowKeyholder { who_is_here });
        }

        let error = Visit::scanned_member(pool, barcode).await?;
        if !error.is_empty() {
            tracing::warn!(barcode = %barcode, "{}", error);
            errors.push(error);
            continue;
        }

        // Only someone who just came in can pick up the key
        if current.is_empty()
            && Visit::in_building(pool, barcode).await?
            && Account::set_key_holder_active(pool, barcode).await?
        {
            current = barcode.to_string();
        }
    }

    Ok(ScanOutcome::Updated { errors })
}

/// Hands the key to `barcode`, checking them in first. Returns false when
/// they cannot hold the key.
pub async fn make_keyholder(pool: &SqlitePool, barcode: &str) -> Result<bool, sqlx::Error> {
    Visit::check_in_member(pool, barcode).await?;
    Account::set_key_holder_active(pool, barcode).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::account::tests::pool_with_keyholders;

    fn barcodes(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_keyholder_stays_until_relieved() {
        let pool = pool_with_keyholders().await;

        let keyholder = checkin(&pool, &barcodes(&["100091", "100032"])).await.unwrap();
        assert_eq!(keyholder, "100091");

        let leaving = checkout(&pool, "100091", &barcodes(&["100091", "100032"])).await.unwrap();

        assert_eq!(leaving, "100091");
        assert!(!Visit::in_building(&pool, "100032").await.unwrap());
        assert!(Visit::in_building(&pool, "100091").await.unwrap());
    }

    #[tokio::test]
    async fn test_checkin_skips_ineligible_for_keyholder() {
        let pool = pool_with_keyholders().await;

        let keyholder = checkin(&pool, &barcodes(&["100032", "100015", "100091"])).await.unwrap();

        assert_eq!(keyholder, "100015");
        let active = Account::get_active_key_holder(&pool).await.unwrap().unwrap();
        assert_eq!(active.barcode, "100015");
    }

    #[tokio::test]
    async fn test_checkin_keeps_existing_keyholder() {
        let pool = pool_with_keyholders().await;
        checkin(&pool, &barcodes(&["100091"])).await.unwrap();

        let keyholder = checkin(&pool, &barcodes(&["100015"])).await.unwrap();

        assert_eq!(keyholder, "100091");
    }

    #[tokio::test]
    async fn test_checkout_without_keyholder() {
        let pool = pool_with_keyholders().await;
        Visit::check_in_member(&pool, "100032").await.unwrap();

        let leaving = checkout(&pool, "", &barcodes(&["100032"])).await.unwrap();

        assert_eq!(leaving, "");
        assert!(!Visit::in_building(&pool, "100032").await.unwrap());
    }

    #[tokio::test]
    async fn test_bulk_checkout() {
        let pool = pool_with_keyholders().await;
        Visit::check_in_member(&pool, "100032").await.unwrap();

        let leaving = bulk_checkout(&pool, &barcodes(&["100015"]), &barcodes(&["100032"])).await.unwrap();

        assert_eq!(leaving, "");
        assert!(Visit::in_building(&pool, "100015").await.unwrap());
        assert!(!Visit::in_building(&pool, "100032").await.unwrap());
    }

    #[tokio::test]
    async fn test_scan_makes_first_keyholder_active() {
        let pool = pool_with_keyholders().await;

        let outcome = scan(&pool, "999901", " 100032  100091 ").await.unwrap();

        assert!(matches!(outcome, ScanOutcome::Updated { ref errors } if errors.is_empty()));
        assert!(Visit::in_building(&pool, "100032").await.unwrap());
        let active = Account::get_active_key_holder(&pool).await.unwrap().unwrap();
        assert_eq!(active.barcode, "100091");
    }

    #[tokio::test]
    async fn test_scan_out_does_not_take_the_key() {
        let pool = pool_with_keyholders().await;
        Visit::check_in_member(&pool, "100015").await.unwrap();
        Visit::check_in_member(&pool, "100032").await.unwrap();

        scan(&pool, "999901", "100015").await.unwrap();

        assert!(!Visit::in_building(&pool, "100015").await.unwrap());
        assert!(Account::get_active_key_holder(&pool).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_scan_unknown_barcode() {
        let pool = pool_with_keyholders().await;

        let outcome = scan(&pool, "999901", "nobody").await.unwrap();

        match outcome {
            ScanOutcome::Updated { errors } => assert_eq!(errors, vec!["Invalid barcode: nobody"]),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_last_keyholder_scan_closes_building() {
        let pool = pool_with_keyholders().await;
        scan(&pool, "999901", "100091").await.unwrap();

        let outcome = scan(&pool, "999901", "100091").await.unwrap();

        assert!(matches!(outcome, ScanOutcome::Closed));
        assert!(!Visit::in_building(&pool, "100091").await.unwrap());
        assert!(Account::get_active_key_holder(&pool).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_keyholder_scan_with_others_present() {
        let pool = pool_with_keyholders().await;
        scan(&pool, "999901", "100091 100032").await.unwrap();

        let outcome = scan(&pool, "999901", "100091").await.unwrap();

        match outcome {
            ScanOutcome::ShowKeyholder { who_is_here } => assert_eq!(who_is_here.len(), 2),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(Visit::in_building(&pool, "100091").await.unwrap());
    }

    #[tokio::test]
    async fn test_master_barcode_always_shows_keyholder_page() {
        let pool = pool_with_keyholders().await;

        let outcome = scan(&pool, "999901", "999901").await.unwrap();

        assert!(matches!(outcome, ScanOutcome::ShowKeyholder { .. }));
    }

    #[tokio::test]
    async fn test_close_building_and_oops() {
        let pool = pool_with_keyholders().await;
        scan(&pool, "999901", "100091 100032").await.unwrap();

        close_building(&pool, "100091").await.unwrap();
        assert!(!Visit::in_building(&pool, "100032").await.unwrap());

        Visit::oops_forgot(&pool).await.unwrap();
        assert!(Visit::in_building(&pool, "100032").await.unwrap());
        assert!(!Visit::in_building(&pool, "100091").await.unwrap());
    }

    #[tokio::test]
    async fn test_make_keyholder() {
        let pool = pool_with_keyholders().await;

        assert!(make_keyholder(&pool, "100015").await.unwrap());
        assert!(Visit::in_building(&pool, "100015").await.unwrap());
        assert!(!make_keyholder(&pool, "100032").await.unwrap());
    }
}
