use crate::m20261001_000001_create_tenancy::Tenants;
use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(TriageRules::Table)
                    .if_not_exists()
                    .col(pk_uuid(TriageRules::Id).default(Expr::cust("gen_random_uuid()")))
                    .col(uuid(TriageRules::TenantId))
                    .col(string(TriageRules::Name))
                    .col(text_null(TriageRules::Description))
                    .col(json_binary(TriageRules::Definition))
                    .col(boolean(TriageRules::Active).default(true))
                    .col(integer(TriageRules::Priority).default(0))
                    .col(timestamp_with_time_zone(TriageRules::CreatedAt).default(Expr::current_timestamp()))
                    .col(timestamp_with_time_zone(TriageRules::UpdatedAt).default(Expr::current_timestamp()))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_triage_rules_tenant_id")
                            .from(TriageRules::Table, TriageRules::TenantId)
                            .to(Tenants::Table, Tenants::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_triage_rules_tenant_active_priority")
                    .table(TriageRules::Table)
                    .col(TriageRules::TenantId)
                    .col(TriageRules::Active)
                    .col(TriageRules::Priority)
                    .to_owned(),
            )
            .await?;

        manager
            .get_connection()
            .execute_unprepared(
                r#"
                CREATE TRIGGER triage_rules_touch_updated_at
                    BEFORE UPDATE ON triage_rules
                    FOR EACH ROW
                    EXECUTE FUNCTION util.touch_updated_at()
                "#,
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(TriageRules::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum TriageRules {
    Table,
    Id,
    TenantId,
    Name,
    Description,
    Definition,
    Active,
    Priority,
    CreatedAt,
    UpdatedAt,
}
