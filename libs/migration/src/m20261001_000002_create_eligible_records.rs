use crate::m20261001_000001_create_tenancy::{Hospitals, Tenants};
use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(EligibleRecords::Table)
                    .if_not_exists()
                    .col(pk_uuid(EligibleRecords::Id).default(Expr::cust("gen_random_uuid()")))
                    .col(uuid(EligibleRecords::TenantId))
                    .col(uuid(EligibleRecords::HospitalId))
                    .col(string(EligibleRecords::PatientName))
                    .col(date(EligibleRecords::BirthDate))
                    .col(timestamp_with_time_zone(EligibleRecords::DeathTime))
                    .col(text(EligibleRecords::CauseOfDeath))
                    .col(string_null(EligibleRecords::MedicalRecord))
                    .col(string_null(EligibleRecords::Sector))
                    .col(string_null(EligibleRecords::Bed))
                    .col(boolean(EligibleRecords::IdentityUnknown).default(false))
                    .col(boolean(EligibleRecords::Processed).default(false))
                    .col(timestamp_with_time_zone_null(EligibleRecords::ProcessedAt))
                    .col(timestamp_with_time_zone(EligibleRecords::CreatedAt).default(Expr::current_timestamp()))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_eligible_records_tenant_id")
                            .from(EligibleRecords::Table, EligibleRecords::TenantId)
                            .to(Tenants::Table, Tenants::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_eligible_records_hospital_id")
                            .from(EligibleRecords::Table, EligibleRecords::HospitalId)
                            .to(Hospitals::Table, Hospitals::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        // Poller scan: unprocessed records of one hospital, oldest first
        manager
            .create_index(
                Index::create()
                    .name("idx_eligible_records_poll")
                    .table(EligibleRecords::Table)
                    .col(EligibleRecords::HospitalId)
                    .col(EligibleRecords::Processed)
                    .col(EligibleRecords::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(EligibleRecords::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
pub enum EligibleRecords {
    Table,
    Id,
    TenantId,
    HospitalId,
    PatientName,
    BirthDate,
    DeathTime,
    CauseOfDeath,
    MedicalRecord,
    Sector,
    Bed,
    IdentityUnknown,
    Processed,
    ProcessedAt,
    CreatedAt,
}
