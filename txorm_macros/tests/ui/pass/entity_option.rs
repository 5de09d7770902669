use txorm_core::{Entity, Fetchable, Identifiable, Value};
use txorm_macros::Entity;

#[derive(Entity, Clone, Debug, PartialEq)]
struct Article {
    #[column(id)]
    id: Option<i64>,
    title: String,
    // Optional and not required: may be persisted as NULL.
    subtitle: Option<String>,
}

fn main() {
    assert_eq!(Article::TABLE, "articles");
    assert_eq!(Article::SELECT_COLUMNS, &["id", "title", "subtitle"]);

    let mut a = Article { id: None, title: "t".into(), subtitle: None };
    assert_eq!(a.id(), None);
    a.set_id(5);
    assert_eq!(a.id(), Some(5));

    let row = a.to_row();
    assert_eq!(row.get("subtitle"), Some(&Value::Null));
    assert_eq!(Article::from_row(&row).unwrap(), a);

    let subtitle = Article::SCHEMA.field("subtitle").unwrap();
    assert!(subtitle.nullable && !subtitle.rejects_null());
    assert!(Article::SCHEMA.identity().identity);
}
