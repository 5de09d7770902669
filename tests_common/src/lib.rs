//! Shared entities and backend-agnostic transaction scenarios.
//!
//! Each backend's test suite implements [`SourceFactory`] and runs the scenarios below
//! against its own store, so every store is held to the same commit/rollback contract.

use async_trait::async_trait;
use txorm_core::{
    DataSource, EntityManager, EntitySchema, FindQuery, OrmError, OrmResult, SessionSource,
};
use txorm_macros::Entity;

#[derive(Entity, Clone, Debug, PartialEq)]
pub struct Post {
    #[column(id)]
    pub id: Option<i64>,
    #[column(required)]
    pub title: Option<String>,
}

#[derive(Entity, Clone, Debug, PartialEq)]
pub struct Category {
    #[column(id)]
    pub id: Option<i64>,
    #[column(required, unique)]
    pub name: Option<String>,
}

pub fn new_post(title: &str) -> Post {
    Post {
        id: None,
        title: Some(title.to_string()),
    }
}

pub fn new_category(name: &str) -> Category {
    Category {
        id: None,
        name: Some(name.to_string()),
    }
}

/// Schemas every scenario store must hold tables for.
pub fn schemas() -> [&'static EntitySchema; 2] {
    use txorm_core::Entity as _;
    [Post::SCHEMA, Category::SCHEMA]
}

/// Application error used to check that body errors come back untouched.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Orm(#[from] OrmError),
    #[error("rejected: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait SourceFactory: Sync {
    type Source: SessionSource + 'static;

    /// A data source over an empty store with tables for [`schemas`].
    async fn fresh(&self) -> OrmResult<DataSource<Self::Source>>;
}

fn by_name(name: &str) -> FindQuery {
    FindQuery::new().eq("name", name)
}

fn by_title(title: &str) -> FindQuery {
    FindQuery::new().eq("title", title)
}

pub async fn commit_makes_writes_visible<S: SessionSource>(
    ds: &DataSource<S>,
) -> OrmResult<()> {
    let (cat, post) = ds
        .transaction(|em| async move {
            let cat = em.persist(new_category("rust")).await?;
            let post = em.persist(new_post("hello")).await?;
            Ok::<_, OrmError>((cat, post))
        })
        .await?;
    assert!(cat.id.is_some());
    assert!(post.id.is_some());

    let found: Option<Category> = ds.find_one(by_name("rust")).await?;
    assert_eq!(found, Some(cat));
    let found = ds.find_by_id::<Post>(post.id.unwrap_or_default()).await?;
    assert_eq!(found, Some(post));
    Ok(())
}

/// `n` valid categories followed by an untitled post: nothing may survive.
pub async fn failed_body_rolls_back_everything<S: SessionSource>(
    ds: &DataSource<S>,
    n: usize,
) -> OrmResult<()> {
    let names: Vec<String> = (0..n).map(|i| format!("category-{i}")).collect();
    let body_names = names.clone();
    let res = ds
        .transaction(|em| async move {
            for name in &body_names {
                em.persist(new_category(name)).await?;
            }
            em.persist(Post {
                id: None,
                title: None,
            })
            .await?;
            Ok::<_, OrmError>(())
        })
        .await;

    match res {
        Err(OrmError::Validation(v)) => {
            assert_eq!((v.entity, v.field), ("Post", "title"));
        }
        other => panic!("expected a validation error, got {other:?}"),
    }
    for name in &names {
        let found: Option<Category> = ds.find_one(by_name(name)).await?;
        assert!(found.is_none(), "{name} survived the rollback");
    }
    assert!(ds.find::<Category>(FindQuery::new()).await?.is_empty());
    assert!(ds.find::<Post>(FindQuery::new()).await?.is_empty());
    Ok(())
}

pub async fn reads_see_own_writes<S: SessionSource>(ds: &DataSource<S>) -> OrmResult<()> {
    ds.transaction(|em| async move {
        let saved = em.persist(new_post("draft")).await?;
        let id = saved.id.ok_or(OrmError::NotFound)?;
        assert_eq!(em.find_by_id::<Post>(&id).await?, Some(saved.clone()));
        assert_eq!(em.find_one::<Post>(by_title("draft")).await?, Some(saved));
        Ok::<_, OrmError>(())
    })
    .await
}

pub async fn uncommitted_writes_stay_private<S: SessionSource>(
    ds: &DataSource<S>,
) -> OrmResult<()> {
    ds.transaction(|em| async move {
        em.persist(new_category("pending")).await?;
        // A second transaction on its own session.
        let outside: Option<Category> = ds.find_one(by_name("pending")).await?;
        assert!(outside.is_none());
        Ok::<_, OrmError>(())
    })
    .await?;
    assert!(ds.find_one::<Category>(by_name("pending")).await?.is_some());
    Ok(())
}

pub async fn rollback_only_keeps_value_discards_writes<S: SessionSource>(
    ds: &DataSource<S>,
) -> OrmResult<()> {
    let post = ds
        .transaction(|em| async move {
            let post = em.persist(new_post("discard")).await?;
            em.set_rollback_only().await?;
            Ok::<_, OrmError>(post)
        })
        .await?;
    assert!(post.id.is_some());
    assert!(ds.find_one::<Post>(by_title("discard")).await?.is_none());
    Ok(())
}

pub async fn body_error_is_returned_unchanged<S: SessionSource>(
    ds: &DataSource<S>,
) -> OrmResult<()> {
    let res: Result<(), AppError> = ds
        .transaction(|em| async move {
            em.persist(new_post("abandoned")).await?;
            Err::<(), _>(AppError::Rejected("changed my mind".into()))
        })
        .await;
    assert!(matches!(res, Err(AppError::Rejected(ref m)) if m == "changed my mind"));
    assert!(ds.find_one::<Post>(by_title("abandoned")).await?.is_none());
    Ok(())
}

pub async fn constraint_violation_rolls_back<S: SessionSource>(
    ds: &DataSource<S>,
) -> OrmResult<()> {
    ds.persist(new_category("dup")).await?;
    let res = ds
        .transaction(|em| async move {
            em.persist(new_post("collateral")).await?;
            em.persist(new_category("dup")).await?;
            Ok::<_, OrmError>(())
        })
        .await;
    match res {
        Err(OrmError::Constraint { column, .. }) => assert_eq!(column, "name"),
        other => panic!("expected a constraint violation, got {other:?}"),
    }
    assert!(ds.find_one::<Post>(by_title("collateral")).await?.is_none());
    assert_eq!(ds.find::<Category>(by_name("dup")).await?.len(), 1);
    Ok(())
}

pub async fn update_then_remove<S: SessionSource>(ds: &DataSource<S>) -> OrmResult<()> {
    let mut post = ds.persist(new_post("v1")).await?;
    let id = post.id.ok_or(OrmError::NotFound)?;
    post.title = Some("v2".into());
    let post = ds.persist(post).await?;
    assert_eq!(post.id, Some(id));

    let found = ds.find_by_id::<Post>(id).await?;
    assert_eq!(found.and_then(|p| p.title), Some("v2".to_string()));
    assert_eq!(ds.find::<Post>(FindQuery::new()).await?.len(), 1);

    assert!(ds.remove(post.clone()).await?);
    assert!(!ds.remove(post).await?);
    assert!(ds.find_by_id::<Post>(id).await?.is_none());
    Ok(())
}

pub async fn explicit_identity_is_inserted<S: SessionSource>(
    ds: &DataSource<S>,
) -> OrmResult<()> {
    let cat = ds
        .persist(Category {
            id: Some(42),
            name: Some("explicit".into()),
        })
        .await?;
    assert_eq!(cat.id, Some(42));
    let found = ds.find_by_id::<Category>(42).await?;
    assert_eq!(found.and_then(|c| c.name), Some("explicit".to_string()));
    Ok(())
}

pub async fn find_orders_by_identity_and_limits<S: SessionSource>(
    ds: &DataSource<S>,
) -> OrmResult<()> {
    for _ in 0..3 {
        ds.persist(new_post("same")).await?;
    }
    ds.persist(new_post("other")).await?;

    let all = ds.find::<Post>(by_title("same")).await?;
    assert_eq!(all.len(), 3);
    assert!(all.windows(2).all(|w| w[0].id < w[1].id));

    let two = ds.find::<Post>(by_title("same").limit(2)).await?;
    assert_eq!(two, all[..2].to_vec());

    let first = ds.find_one::<Post>(by_title("same")).await?;
    assert_eq!(first.and_then(|p| p.id), all[0].id);
    Ok(())
}

pub async fn unknown_field_is_rejected<S: SessionSource>(ds: &DataSource<S>) -> OrmResult<()> {
    let err = ds
        .find_one::<Post>(FindQuery::new().eq("author", "x"))
        .await
        .map(|_| ())
        .unwrap_err();
    assert!(matches!(err, OrmError::UnknownField { entity: "Post", ref field } if field == "author"));
    Ok(())
}

pub async fn manager_is_closed_after_scope<S: SessionSource>(
    ds: &DataSource<S>,
) -> OrmResult<()> {
    let leaked: EntityManager = ds
        .transaction(|em| async move { Ok::<_, OrmError>(em.clone()) })
        .await?;
    assert!(!leaked.is_open().await);
    assert!(matches!(
        leaked.persist(new_post("late")).await,
        Err(OrmError::ScopeClosed)
    ));
    assert!(ds.find_one::<Post>(by_title("late")).await?.is_none());
    Ok(())
}

/// Run every scenario, each against a fresh store.
pub async fn run_all<F: SourceFactory>(f: &F) -> OrmResult<()> {
    commit_makes_writes_visible(&f.fresh().await?).await?;
    failed_body_rolls_back_everything(&f.fresh().await?, 3).await?;
    reads_see_own_writes(&f.fresh().await?).await?;
    uncommitted_writes_stay_private(&f.fresh().await?).await?;
    rollback_only_keeps_value_discards_writes(&f.fresh().await?).await?;
    body_error_is_returned_unchanged(&f.fresh().await?).await?;
    constraint_violation_rolls_back(&f.fresh().await?).await?;
    update_then_remove(&f.fresh().await?).await?;
    explicit_identity_is_inserted(&f.fresh().await?).await?;
    find_orders_by_identity_and_limits(&f.fresh().await?).await?;
    unknown_field_is_rejected(&f.fresh().await?).await?;
    manager_is_closed_after_scope(&f.fresh().await?).await?;
    Ok(())
}
