//! Create feed entry table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(FeedEntry::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(FeedEntry::Id)
                            .string_len(64)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(FeedEntry::UserId).string_len(64).not_null())
                    .col(ColumnDef::new(FeedEntry::PostId).string_len(64).not_null())
                    .col(ColumnDef::new(FeedEntry::AuthorId).string_len(64).not_null())
                    .col(ColumnDef::new(FeedEntry::Body).text().not_null())
                    .col(
                        ColumnDef::new(FeedEntry::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_feed_entry_user")
                            .from(FeedEntry::Table, FeedEntry::UserId)
                            .to(User::Table, User::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // No unique (user_id, post_id): redelivery writes a second entry.
        manager
            .create_index(
                Index::create()
                    .name("idx_feed_entry_user_id_created_at")
                    .table(FeedEntry::Table)
                    .col(FeedEntry::UserId)
                    .col(FeedEntry::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(FeedEntry::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum FeedEntry {
    Table,
    Id,
    UserId,
    PostId,
    AuthorId,
    Body,
    CreatedAt,
}

#[derive(Iden)]
enum User {
    Table,
    Id,
}
