use sea_orm::entity::prelude::*;

/// Read side of the `eligible_records` feed table; only `processed` and
/// `processed_at` are ever written from here.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "eligible_records")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub hospital_id: Uuid,
    pub patient_name: String,
    pub birth_date: Date,
    pub death_time: DateTimeWithTimeZone,
    #[sea_orm(column_type = "Text")]
    pub cause_of_death: String,
    pub medical_record: Option<String>,
    pub sector: Option<String>,
    pub bed: Option<String>,
    pub identity_unknown: bool,
    pub processed: bool,
    pub processed_at: Option<DateTimeWithTimeZone>,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::hospital::Entity",
        from = "Column::HospitalId",
        to = "super::hospital::Column::Id"
    )]
    Hospital,
}

impl Related<super::hospital::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Hospital.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl From<Model> for crate::models::EligibleRecord {
    fn from(model: Model) -> Self {
        Self {
            id: model.id,
            tenant_id: model.tenant_id,
            hospital_id: model.hospital_id,
            patient_name: model.patient_name,
            birth_date: model.birth_date,
            death_time: model.death_time.into(),
            cause_of_death: model.cause_of_death,
            medical_record: model.medical_record,
            sector: model.sector,
            bed: model.bed,
            identity_unknown: model.identity_unknown,
            processed: model.processed,
            processed_at: model.processed_at.map(Into::into),
            created_at: model.created_at.into(),
        }
    }
}
