use txorm_core::{Entity, Fetchable, Identifiable, ValueKind};
use txorm_macros::Entity;

#[derive(Entity, Clone, Debug, PartialEq)]
#[entity(table = "blog_categories")]
struct Category {
    #[column(id, name = "category_id")]
    id: Option<i32>,
    #[column(name = "category_name", required, unique)]
    name: Option<String>,
    #[column(skip)]
    scratch: u8,
}

fn main() {
    assert_eq!(Category::TABLE, "blog_categories");
    assert_eq!(Category::ID_COLUMN, "category_id");
    assert_eq!(Category::SELECT_COLUMNS, &["category_id", "category_name"]);

    let name = Category::SCHEMA.field("name").unwrap();
    assert_eq!(name.column, "category_name");
    assert_eq!(name.kind, ValueKind::String);
    assert!(name.required && name.unique && name.rejects_null());
    assert!(Category::SCHEMA.field("scratch").is_none());

    let c = Category { id: Some(3), name: Some("n".into()), scratch: 9 };
    let back = Category::from_row(&c.to_row()).unwrap();
    assert_eq!(back.scratch, 0);
    assert_eq!(back.name, c.name);
}
