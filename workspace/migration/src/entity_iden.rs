use model::entities::prelude::*;
use sea_orm::entity::prelude::*;
use sea_orm::Iden;

/// Lets later migrations name tables and columns through the entity
/// definitions instead of repeating string literals.
pub trait EntityIden: EntityTrait {
    fn table() -> NameIden {
        NameIden(Self::default().table_name().to_string())
    }

    fn column<C: ColumnTrait + Iden>(column: C) -> NameIden {
        let mut name = String::new();
        column.unquoted(&mut name);
        NameIden(name)
    }
}

impl EntityIden for User {}
impl EntityIden for MeterReading {}
impl EntityIden for Invoice {}

/// An owned table or column name usable wherever sea-query expects an `Iden`.
#[derive(Debug, Clone)]
pub struct NameIden(String);

impl Iden for NameIden {
    fn unquoted(&self, s: &mut dyn std::fmt::Write) {
        let _ = s.write_str(&self.0);
    }
}
