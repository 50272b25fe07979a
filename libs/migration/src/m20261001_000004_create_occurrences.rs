use crate::m20261001_000001_create_tenancy::{Hospitals, Tenants, Users};
use crate::m20261001_000002_create_eligible_records::EligibleRecords;
use sea_orm_migration::sea_query::extension::postgres::Type;
use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

fn status_values() -> [OccurrenceStatus; 6] {
    [
        OccurrenceStatus::Pending,
        OccurrenceStatus::InProgress,
        OccurrenceStatus::Accepted,
        OccurrenceStatus::Declined,
        OccurrenceStatus::Completed,
        OccurrenceStatus::Cancelled,
    ]
}

fn outcome_values() -> [OccurrenceOutcome; 5] {
    [
        OccurrenceOutcome::CaptureSuccess,
        OccurrenceOutcome::FamilyRefused,
        OccurrenceOutcome::MedicalContraindication,
        OccurrenceOutcome::TimeExceeded,
        OccurrenceOutcome::Other,
    ]
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_type(
                Type::create()
                    .as_enum(OccurrenceStatus::Enum)
                    .values(status_values())
                    .to_owned(),
            )
            .await?;

        manager
            .create_type(
                Type::create()
                    .as_enum(OccurrenceOutcome::Enum)
                    .values(outcome_values())
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Occurrences::Table)
                    .if_not_exists()
                    .col(pk_uuid(Occurrences::Id).default(Expr::cust("gen_random_uuid()")))
                    .col(uuid(Occurrences::TenantId))
                    .col(uuid(Occurrences::HospitalId))
                    // One occurrence per eligible record, ever
                    .col(uuid(Occurrences::RecordId).unique_key())
                    .col(
                        ColumnDef::new(Occurrences::Status)
                            .enumeration(OccurrenceStatus::Enum, status_values())
                            .not_null()
                            .default("pendente"),
                    )
                    .col(integer(Occurrences::PriorityScore).default(0))
                    .col(string(Occurrences::MaskedName))
                    .col(json_binary(Occurrences::FullPayload))
                    .col(timestamp_with_time_zone(Occurrences::DeathTime))
                    .col(timestamp_with_time_zone(Occurrences::WindowExpiresAt))
                    .col(timestamp_with_time_zone_null(Occurrences::NotifiedAt))
                    .col(timestamp_with_time_zone(Occurrences::CreatedAt).default(Expr::current_timestamp()))
                    .col(timestamp_with_time_zone(Occurrences::UpdatedAt).default(Expr::current_timestamp()))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_occurrences_tenant_id")
                            .from(Occurrences::Table, Occurrences::TenantId)
                            .to(Tenants::Table, Tenants::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_occurrences_hospital_id")
                            .from(Occurrences::Table, Occurrences::HospitalId)
                            .to(Hospitals::Table, Hospitals::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_occurrences_record_id")
                            .from(Occurrences::Table, Occurrences::RecordId)
                            .to(EligibleRecords::Table, EligibleRecords::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_occurrences_tenant_status")
                    .table(Occurrences::Table)
                    .col(Occurrences::TenantId)
                    .col(Occurrences::Status)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_occurrences_hospital_created_at")
                    .table(Occurrences::Table)
                    .col(Occurrences::HospitalId)
                    .col(Occurrences::CreatedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(OccurrenceHistory::Table)
                    .if_not_exists()
                    .col(pk_uuid(OccurrenceHistory::Id).default(Expr::cust("gen_random_uuid()")))
                    .col(uuid(OccurrenceHistory::OccurrenceId))
                    .col(uuid(OccurrenceHistory::TenantId))
                    .col(uuid_null(OccurrenceHistory::UserId))
                    .col(string(OccurrenceHistory::Action))
                    .col(
                        ColumnDef::new(OccurrenceHistory::PreviousStatus)
                            .enumeration(OccurrenceStatus::Enum, status_values())
                            .null(),
                    )
                    .col(
                        ColumnDef::new(OccurrenceHistory::NewStatus)
                            .enumeration(OccurrenceStatus::Enum, status_values())
                            .null(),
                    )
                    .col(text_null(OccurrenceHistory::Notes))
                    .col(
                        ColumnDef::new(OccurrenceHistory::Outcome)
                            .enumeration(OccurrenceOutcome::Enum, outcome_values())
                            .null(),
                    )
                    .col(timestamp_with_time_zone(OccurrenceHistory::CreatedAt).default(Expr::current_timestamp()))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_occurrence_history_occurrence_id")
                            .from(OccurrenceHistory::Table, OccurrenceHistory::OccurrenceId)
                            .to(Occurrences::Table, Occurrences::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_occurrence_history_user_id")
                            .from(OccurrenceHistory::Table, OccurrenceHistory::UserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_occurrence_history_occurrence_created_at")
                    .table(OccurrenceHistory::Table)
                    .col(OccurrenceHistory::OccurrenceId)
                    .col(OccurrenceHistory::CreatedAt)
                    .to_owned(),
            )
            .await?;

        let db = manager.get_connection();

        // At most one registered outcome per occurrence
        db.execute_unprepared(
            r#"
            CREATE UNIQUE INDEX idx_occurrence_history_single_outcome
                ON occurrence_history (occurrence_id)
                WHERE action = 'outcome registered'
            "#,
        )
        .await?;

        db.execute_unprepared(
            r#"
            CREATE TRIGGER occurrences_touch_updated_at
                BEFORE UPDATE ON occurrences
                FOR EACH ROW
                EXECUTE FUNCTION util.touch_updated_at()
            "#,
        )
        .await?;

        // The ledger is append-only
        db.execute_unprepared(
            r#"
            CREATE OR REPLACE FUNCTION util.reject_history_mutation()
            RETURNS TRIGGER AS $$
            BEGIN
                RAISE EXCEPTION 'occurrence_history is append-only';
            END;
            $$ LANGUAGE plpgsql
            "#,
        )
        .await?;
        db.execute_unprepared(
            r#"
            CREATE TRIGGER occurrence_history_append_only
                BEFORE UPDATE OR DELETE ON occurrence_history
                FOR EACH ROW
                EXECUTE FUNCTION util.reject_history_mutation()
            "#,
        )
        .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(OccurrenceHistory::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Occurrences::Table).to_owned())
            .await?;
        manager
            .get_connection()
            .execute_unprepared("DROP FUNCTION IF EXISTS util.reject_history_mutation()")
            .await?;
        manager
            .drop_type(Type::drop().name(OccurrenceOutcome::Enum).to_owned())
            .await?;
        manager
            .drop_type(Type::drop().name(OccurrenceStatus::Enum).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
pub enum Occurrences {
    Table,
    Id,
    TenantId,
    HospitalId,
    RecordId,
    Status,
    PriorityScore,
    MaskedName,
    FullPayload,
    DeathTime,
    WindowExpiresAt,
    NotifiedAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum OccurrenceHistory {
    Table,
    Id,
    OccurrenceId,
    TenantId,
    UserId,
    Action,
    PreviousStatus,
    NewStatus,
    Notes,
    Outcome,
    CreatedAt,
}

#[derive(DeriveIden)]
enum OccurrenceStatus {
    #[sea_orm(iden = "occurrence_status")]
    Enum,
    #[sea_orm(iden = "pendente")]
    Pending,
    #[sea_orm(iden = "em_andamento")]
    InProgress,
    #[sea_orm(iden = "aceita")]
    Accepted,
    #[sea_orm(iden = "recusada")]
    Declined,
    #[sea_orm(iden = "concluida")]
    Completed,
    #[sea_orm(iden = "cancelada")]
    Cancelled,
}

#[derive(DeriveIden)]
enum OccurrenceOutcome {
    #[sea_orm(iden = "occurrence_outcome")]
    Enum,
    #[sea_orm(iden = "sucesso_captacao")]
    CaptureSuccess,
    #[sea_orm(iden = "familia_recusou")]
    FamilyRefused,
    #[sea_orm(iden = "contraindicacao_medica")]
    MedicalContraindication,
    #[sea_orm(iden = "tempo_excedido")]
    TimeExceeded,
    #[sea_orm(iden = "outro")]
    Other,
}
