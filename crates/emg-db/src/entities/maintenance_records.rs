use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "maintenance_records")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub device_id: Uuid,
    pub kind_id: Option<Uuid>,
    pub date: Date,
    pub performed_by: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::devices::Entity",
        from = "Column::DeviceId",
        to = "super::devices::Column::Id",
        on_delete = "Restrict"
    )]
    Device,
    #[sea_orm(
        belongs_to = "super::maintenance_kinds::Entity",
        from = "Column::KindId",
        to = "super::maintenance_kinds::Column::Id",
        on_delete = "Restrict"
    )]
    Kind,
}

impl Related<super::devices::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Device.def()
    }
}

impl Related<super::maintenance_kinds::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Kind.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
