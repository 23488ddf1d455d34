use chrono::{TimeDelta, Utc};
use herald_core::models::{CandidateLink, ClassifiedUrl, ContentSource, UrlCategory};
use herald_core::traits::{LinkStore, SourceStore};
use herald_db::{LinkRepository, SourceRepository};

use crate::integration::common::setup_test_db;

#[tokio::test]
async fn due_sources_skip_failed_and_recent() {
    let (pool, _container) = setup_test_db().await;
    let repo = SourceRepository::new(pool);

    let never = repo
        .upsert(&ContentSource::new("https://never.example.com"))
        .await
        .unwrap();
    let recent = repo
        .upsert(&ContentSource::new("https://recent.example.com"))
        .await
        .unwrap();
    let failed = repo
        .upsert(&ContentSource::new("https://failed.example.com"))
        .await
        .unwrap();

    repo.mark_refreshed(recent.id, Utc::now()).await.unwrap();
    repo.record_failure(failed.id, 1).await.unwrap();

    let due = repo.due_sources(10).await.unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].id, never.id);

    repo.mark_refreshed(recent.id, Utc::now() - TimeDelta::hours(2))
        .await
        .unwrap();
    assert_eq!(repo.due_sources(10).await.unwrap().len(), 2);
}

#[tokio::test]
async fn failures_accumulate_until_deactivation() {
    let (pool, _container) = setup_test_db().await;
    let repo = SourceRepository::new(pool);

    let source = repo
        .upsert(&ContentSource::new("https://flaky.example.com"))
        .await
        .unwrap();

    let first = repo.record_failure(source.id, 2).await.unwrap();
    assert_eq!(first.failure_count, 1);
    assert!(!first.has_failed);

    let second = repo.record_failure(source.id, 2).await.unwrap();
    assert_eq!(second.failure_count, 2);
    assert!(second.has_failed);

    repo.mark_refreshed(source.id, Utc::now()).await.unwrap();
    assert_eq!(repo.get(source.id).await.unwrap().unwrap().failure_count, 0);
}

#[tokio::test]
async fn upsert_keeps_id_and_updates_feeds() {
    let (pool, _container) = setup_test_db().await;
    let repo = SourceRepository::new(pool);

    let original = repo
        .upsert(&ContentSource::new("https://example.com"))
        .await
        .unwrap();
    let updated = repo
        .upsert(
            &ContentSource::new("https://example.com")
                .with_feeds(vec!["https://example.com/feed".into()]),
        )
        .await
        .unwrap();

    assert_eq!(updated.id, original.id);
    assert_eq!(updated.rss_urls, vec!["https://example.com/feed".to_string()]);
    assert!(repo.find_by_url("https://example.com").await.unwrap().is_some());
}

#[tokio::test]
async fn saving_links_is_idempotent() {
    let (pool, _container) = setup_test_db().await;
    let sources = SourceRepository::new(pool.clone());
    let links = LinkRepository::new(pool);

    let source = sources
        .upsert(&ContentSource::new("https://example.com"))
        .await
        .unwrap();
    let batch = vec![
        CandidateLink::new("https://example.com/news/one-two-three-four").with_title("One"),
        CandidateLink::new("https://example.com/news/five-six-seven-eight"),
    ];

    assert_eq!(links.save_links(source.id, &batch).await.unwrap(), 2);
    assert_eq!(links.save_links(source.id, &batch).await.unwrap(), 0);

    let stored = links.links_for_source(source.id, 10).await.unwrap();
    assert_eq!(stored.len(), 2);
    assert!(stored.iter().any(|l| l.title.as_deref() == Some("One")));
}

#[tokio::test]
async fn links_for_source_honours_limit_and_scope() {
    let (pool, _container) = setup_test_db().await;
    let sources = SourceRepository::new(pool.clone());
    let links = LinkRepository::new(pool);

    let first = sources
        .upsert(&ContentSource::new("https://first.example.com"))
        .await
        .unwrap();
    let second = sources
        .upsert(&ContentSource::new("https://second.example.com"))
        .await
        .unwrap();

    let batch: Vec<CandidateLink> = (0..5)
        .map(|i| CandidateLink::new(format!("https://first.example.com/news/story-number-{i}")))
        .collect();
    links.save_links(first.id, &batch).await.unwrap();
    links
        .save_links(
            second.id,
            &[CandidateLink::new("https://second.example.com/news/other-site-story")],
        )
        .await
        .unwrap();

    let stored = links.links_for_source(first.id, 3).await.unwrap();
    assert_eq!(stored.len(), 3);
    assert!(stored.iter().all(|l| l.url.starts_with("https://first.example.com/")));
    assert_eq!(links.links_for_source(second.id, 10).await.unwrap().len(), 1);
    assert_eq!(
        links.count_classified("https://first.example.com/news/story-number-0").await.unwrap(),
        0
    );
}

#[tokio::test]
async fn classified_records_are_written_in_chunks() {
    let (pool, _container) = setup_test_db().await;
    let links = LinkRepository::new(pool);

    let records: Vec<ClassifiedUrl> = (0..250)
        .map(|i| ClassifiedUrl {
            url: if i % 2 == 0 {
                "https://example.com/even".to_string()
            } else {
                format!("https://example.com/odd/{i}")
            },
            category: UrlCategory::News,
            confidence: 0.75,
            created_at: Utc::now(),
        })
        .collect();

    assert_eq!(links.save_classified(&records).await.unwrap(), 250);
    assert_eq!(links.count_classified("https://example.com/even").await.unwrap(), 125);
    assert_eq!(links.save_classified(&[]).await.unwrap(), 0);
}
