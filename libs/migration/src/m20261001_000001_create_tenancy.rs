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
                    .as_enum(UserRole::Enum)
                    .values([UserRole::Operator, UserRole::Manager, UserRole::Admin])
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Tenants::Table)
                    .if_not_exists()
                    .col(pk_uuid(Tenants::Id).default(Expr::cust("gen_random_uuid()")))
                    .col(string(Tenants::Name))
                    .col(string(Tenants::Slug).unique_key())
                    .col(boolean(Tenants::Active).default(true))
                    .col(timestamp_with_time_zone(Tenants::CreatedAt).default(Expr::current_timestamp()))
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Hospitals::Table)
                    .if_not_exists()
                    .col(pk_uuid(Hospitals::Id).default(Expr::cust("gen_random_uuid()")))
                    .col(uuid(Hospitals::TenantId))
                    .col(string(Hospitals::Name))
                    .col(string(Hospitals::Code))
                    .col(boolean(Hospitals::Active).default(true))
                    .col(timestamp_with_time_zone(Hospitals::CreatedAt).default(Expr::current_timestamp()))
                    .col(timestamp_with_time_zone(Hospitals::UpdatedAt).default(Expr::current_timestamp()))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_hospitals_tenant_id")
                            .from(Hospitals::Table, Hospitals::TenantId)
                            .to(Tenants::Table, Tenants::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_hospitals_tenant_code")
                    .table(Hospitals::Table)
                    .col(Hospitals::TenantId)
                    .col(Hospitals::Code)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Users::Table)
                    .if_not_exists()
                    .col(pk_uuid(Users::Id).default(Expr::cust("gen_random_uuid()")))
                    .col(uuid(Users::TenantId))
                    .col(uuid_null(Users::HospitalId))
                    .col(string(Users::Name))
                    .col(string(Users::Email).unique_key())
                    .col(string_null(Users::MobilePhone))
                    .col(
                        ColumnDef::new(Users::Role)
                            .enumeration(
                                UserRole::Enum,
                                [UserRole::Operator, UserRole::Manager, UserRole::Admin],
                            )
                            .not_null()
                            .default("operator"),
                    )
                    .col(boolean(Users::IsSuperAdmin).default(false))
                    .col(boolean(Users::Active).default(true))
                    .col(timestamp_with_time_zone(Users::CreatedAt).default(Expr::current_timestamp()))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_users_tenant_id")
                            .from(Users::Table, Users::TenantId)
                            .to(Tenants::Table, Tenants::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_users_hospital_id")
                            .from(Users::Table, Users::HospitalId)
                            .to(Hospitals::Table, Hospitals::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_users_tenant_active")
                    .table(Users::Table)
                    .col(Users::TenantId)
                    .col(Users::Active)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(UserNotificationPreferences::Table)
                    .if_not_exists()
                    .col(pk_uuid(UserNotificationPreferences::UserId))
                    .col(boolean(UserNotificationPreferences::EmailEnabled).default(true))
                    .col(boolean(UserNotificationPreferences::SmsEnabled).default(false))
                    .col(boolean(UserNotificationPreferences::DashboardEnabled).default(true))
                    .col(
                        timestamp_with_time_zone(UserNotificationPreferences::UpdatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_user_notification_preferences_user_id")
                            .from(UserNotificationPreferences::Table, UserNotificationPreferences::UserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        let db = manager.get_connection();
        db.execute_unprepared(
            r#"
            CREATE TRIGGER hospitals_touch_updated_at
                BEFORE UPDATE ON hospitals
                FOR EACH ROW
                EXECUTE FUNCTION util.touch_updated_at()
            "#,
        )
        .await?;
        db.execute_unprepared(
            r#"
            CREATE TRIGGER user_notification_preferences_touch_updated_at
                BEFORE UPDATE ON user_notification_preferences
                FOR EACH ROW
                EXECUTE FUNCTION util.touch_updated_at()
            "#,
        )
        .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(UserNotificationPreferences::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Users::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Hospitals::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Tenants::Table).to_owned())
            .await?;
        manager
            .drop_type(Type::drop().name(UserRole::Enum).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
pub enum Tenants {
    Table,
    Id,
    Name,
    Slug,
    Active,
    CreatedAt,
}

#[derive(DeriveIden)]
pub enum Hospitals {
    Table,
    Id,
    TenantId,
    Name,
    Code,
    Active,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
pub enum Users {
    Table,
    Id,
    TenantId,
    HospitalId,
    Name,
    Email,
    MobilePhone,
    Role,
    IsSuperAdmin,
    Active,
    CreatedAt,
}

#[derive(DeriveIden)]
enum UserNotificationPreferences {
    Table,
    UserId,
    EmailEnabled,
    SmsEnabled,
    DashboardEnabled,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum UserRole {
    #[sea_orm(iden = "user_role")]
    Enum,
    Operator,
    Manager,
    Admin,
}
