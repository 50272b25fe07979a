use crate::m20261001_000001_create_tenancy::{Tenants, Users};
use crate::m20261001_000004_create_occurrences::Occurrences;
use sea_orm_migration::sea_query::extension::postgres::Type;
use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_type(
                Type::create()
                    .as_enum(NotificationChannel::Enum)
                    .values([
                        NotificationChannel::Dashboard,
                        NotificationChannel::Email,
                        NotificationChannel::Sms,
                    ])
                    .to_owned(),
            )
            .await?;

        manager
            .create_type(
                Type::create()
                    .as_enum(NotificationStatus::Enum)
                    .values([
                        NotificationStatus::Sent,
                        NotificationStatus::Failed,
                        NotificationStatus::Pending,
                    ])
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Notifications::Table)
                    .if_not_exists()
                    .col(pk_uuid(Notifications::Id).default(Expr::cust("gen_random_uuid()")))
                    .col(uuid(Notifications::TenantId))
                    .col(uuid(Notifications::OccurrenceId))
                    .col(uuid_null(Notifications::UserId))
                    .col(
                        ColumnDef::new(Notifications::Channel)
                            .enumeration(
                                NotificationChannel::Enum,
                                [
                                    NotificationChannel::Dashboard,
                                    NotificationChannel::Email,
                                    NotificationChannel::Sms,
                                ],
                            )
                            .not_null(),
                    )
                    .col(timestamp_with_time_zone(Notifications::SentAt).default(Expr::current_timestamp()))
                    .col(
                        ColumnDef::new(Notifications::Status)
                            .enumeration(
                                NotificationStatus::Enum,
                                [
                                    NotificationStatus::Sent,
                                    NotificationStatus::Failed,
                                    NotificationStatus::Pending,
                                ],
                            )
                            .not_null()
                            .default("pendente"),
                    )
                    .col(text_null(Notifications::ErrorMessage))
                    .col(json_binary(Notifications::Metadata).default(Expr::cust("'{}'::jsonb")))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_notifications_tenant_id")
                            .from(Notifications::Table, Notifications::TenantId)
                            .to(Tenants::Table, Tenants::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_notifications_occurrence_id")
                            .from(Notifications::Table, Notifications::OccurrenceId)
                            .to(Occurrences::Table, Occurrences::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_notifications_user_id")
                            .from(Notifications::Table, Notifications::UserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        // SMS at-most-once lookup
        manager
            .create_index(
                Index::create()
                    .name("idx_notifications_occurrence_user_channel")
                    .table(Notifications::Table)
                    .col(Notifications::OccurrenceId)
                    .col(Notifications::UserId)
                    .col(Notifications::Channel)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_notifications_tenant_sent_at")
                    .table(Notifications::Table)
                    .col(Notifications::TenantId)
                    .col(Notifications::SentAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Notifications::Table).to_owned())
            .await?;
        manager
            .drop_type(Type::drop().name(NotificationStatus::Enum).to_owned())
            .await?;
        manager
            .drop_type(Type::drop().name(NotificationChannel::Enum).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum Notifications {
    Table,
    Id,
    TenantId,
    OccurrenceId,
    UserId,
    Channel,
    SentAt,
    Status,
    ErrorMessage,
    Metadata,
}

#[derive(DeriveIden)]
enum NotificationChannel {
    #[sea_orm(iden = "notification_channel")]
    Enum,
    Dashboard,
    Email,
    Sms,
}

#[derive(DeriveIden)]
enum NotificationStatus {
    #[sea_orm(iden = "notification_status")]
    Enum,
    #[sea_orm(iden = "enviado")]
    Sent,
    #[sea_orm(iden = "falha")]
    Failed,
    #[sea_orm(iden = "pendente")]
    Pending,
}
