//! Integration tests for `PgStore` against a real PostgreSQL.
//!
//! Set `SHELF_TEST_DATABASE_URL` to an empty scratch database to run them;
//! without it every test returns early.

use shelf_db::{
    BookCopy, BorrowerRef, LoanRecord, OpenLoan, PgStore, SequenceCounter, Store, StoreError, Title,
};
use time::OffsetDateTime;
use uuid::Uuid;

async fn store() -> Option<PgStore> {
    let url = std::env::var("SHELF_TEST_DATABASE_URL").ok()?;
    let store = PgStore::connect(&url, 5)
        .await
        .expect("Failed to connect to test database");
    store.migrate().await.expect("Failed to run migrations");
    Some(store)
}

fn title(name: &str) -> Title {
    let now = OffsetDateTime::now_utc();
    Title {
        id: Uuid::now_v7(),
        title: format!("{name} {}", Uuid::now_v7()),
        author: "Integration Author".to_string(),
        details: "details".to_string(),
        price: 250.0,
        course: "B.Tech".to_string(),
        branch: "CSE".to_string(),
        created_at: now,
        updated_at: now,
    }
}

fn copy(title_id: Uuid) -> BookCopy {
    BookCopy {
        id: format!("T{}", &Uuid::now_v7().simple().to_string()[..12]),
        title_id,
        issued: false,
        tampered: false,
        created_at: OffsetDateTime::now_utc(),
    }
}

#[tokio::test]
async fn migrations_are_idempotent() {
    let Some(store) = store().await else { return };
    store.migrate().await.expect("Second migration run failed");
    store.ping().await.expect("Ping failed");
}

#[tokio::test]
async fn counter_compare_and_swap() {
    let Some(store) = store().await else { return };
    let name = format!("test-{}", Uuid::now_v7());
    let first = SequenceCounter {
        name: name.clone(),
        prefix: "AA".to_string(),
        number: 1,
    };

    assert!(store.swap_counter(None, &first).await.expect("insert"));
    assert!(!store.swap_counter(None, &first).await.expect("second insert"));

    let second = SequenceCounter {
        number: 2,
        ..first.clone()
    };
    assert!(store.swap_counter(Some(&first), &second).await.expect("swap"));
    assert!(!store.swap_counter(Some(&first), &second).await.expect("stale swap"));
    assert_eq!(store.load_counter(&name).await.expect("load"), Some(second));
}

#[tokio::test]
async fn issue_and_return_are_atomic_pairs() {
    let Some(store) = store().await else { return };
    let parent = title("Circulation");
    let copy = copy(parent.id);
    store
        .insert_title(&parent, std::slice::from_ref(&copy))
        .await
        .expect("insert title");

    let borrower = BorrowerRef::student(Uuid::now_v7().to_string());
    let now = OffsetDateTime::now_utc();
    let loan = LoanRecord::open(borrower.clone(), "lib-1", copy.id.clone(), now);
    assert_eq!(store.open_loan(&loan).await.expect("open"), OpenLoan::Opened);

    let other = LoanRecord::open(BorrowerRef::faculty("f-1"), "lib-1", copy.id.clone(), now);
    assert_eq!(
        store.open_loan(&other).await.expect("second open"),
        OpenLoan::AlreadyIssued
    );

    let closed = store
        .close_loan(&borrower, &copy.id, now, None)
        .await
        .expect("close")
        .expect("loan should be open");
    assert!(closed.returned);

    let reloaded = store.get_copy(&copy.id).await.expect("get copy").expect("copy");
    assert!(!reloaded.issued);
    assert!(store
        .close_loan(&borrower, &copy.id, now, None)
        .await
        .expect("second close")
        .is_none());
}

#[tokio::test]
async fn failed_copy_insert_rolls_back_the_title() {
    let Some(store) = store().await else { return };
    let parent = title("Rollback");
    let copy = copy(parent.id);

    let err = store
        .insert_title(&parent, &[copy.clone(), copy.clone()])
        .await
        .expect_err("duplicate copy id");
    assert!(matches!(err, StoreError::Duplicate { .. }));
    assert!(store.get_title(parent.id).await.expect("get title").is_none());
    assert!(store.get_copy(&copy.id).await.expect("get copy").is_none());

    store
        .insert_title(&parent, std::slice::from_ref(&copy))
        .await
        .expect("retry succeeds");
    assert_eq!(
        store.copies_for_title(parent.id).await.expect("copies").len(),
        1
    );
}
