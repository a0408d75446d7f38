use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "devices")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub name: String,
    /// `eigen` or `miete`.
    pub ownership: String,
    pub serial_number: String,
    pub client: Option<String>,
    pub ip_address: Option<String>,
    pub pin: Option<String>,
    pub kind_id: Option<Uuid>,
    pub status_id: Option<Uuid>,
    pub purchase_date: Option<Date>,
    pub next_service_date: Option<Date>,
    pub notes: Option<String>,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::device_kinds::Entity",
        from = "Column::KindId",
        to = "super::device_kinds::Column::Id",
        on_delete = "Restrict"
    )]
    Kind,
    #[sea_orm(
        belongs_to = "super::device_statuses::Entity",
        from = "Column::StatusId",
        to = "super::device_statuses::Column::Id",
        on_delete = "Restrict"
    )]
    Status,
    #[sea_orm(has_many = "super::deployments::Entity")]
    Deployments,
    #[sea_orm(has_many = "super::maintenance_records::Entity")]
    MaintenanceRecords,
}

impl Related<super::device_kinds::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Kind.def()
    }
}

impl Related<super::device_statuses::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Status.def()
    }
}

impl Related<super::deployments::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Deployments.def()
    }
}

impl Related<super::maintenance_records::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::MaintenanceRecords.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
