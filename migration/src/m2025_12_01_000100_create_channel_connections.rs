//! Migration to create the channel_connections table.
//!
//! A channel connection links one seller to one external sales channel
//! account/store, carrying encrypted credential material and sync status.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ChannelConnections::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ChannelConnections::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ChannelConnections::SellerId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ChannelConnections::ChannelType)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ChannelConnections::ExternalId)
                            .text()
                            .not_null(),
                    )
                    .col(ColumnDef::new(ChannelConnections::DisplayName).text().null())
                    .col(ColumnDef::new(ChannelConnections::StoreUrl).text().null())
                    .col(
                        ColumnDef::new(ChannelConnections::Status)
                            .text()
                            .not_null()
                            .default("connected"),
                    )
                    .col(
                        ColumnDef::new(ChannelConnections::Active)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(ChannelConnections::AccessTokenCiphertext)
                            .binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ChannelConnections::RefreshTokenCiphertext)
                            .binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ChannelConnections::ApiKeyCiphertext)
                            .binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ChannelConnections::ExpiresAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(ChannelConnections::Scopes).json_binary().null())
                    .col(
                        ColumnDef::new(ChannelConnections::Metadata)
                            .json_binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ChannelConnections::LastSyncedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ChannelConnections::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(ChannelConnections::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Natural key: one connection per seller/channel/store
        manager
            .create_index(
                Index::create()
                    .name("idx_channel_connections_seller_channel_external")
                    .table(ChannelConnections::Table)
                    .col(ChannelConnections::SellerId)
                    .col(ChannelConnections::ChannelType)
                    .col(ChannelConnections::ExternalId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_channel_connections_seller_id")
                    .table(ChannelConnections::Table)
                    .col(ChannelConnections::SellerId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_channel_connections_seller_channel_external")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(
                Index::drop()
                    .name("idx_channel_connections_seller_id")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(ChannelConnections::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ChannelConnections {
    Table,
    Id,
    SellerId,
    ChannelType,
    ExternalId,
    DisplayName,
    StoreUrl,
    Status,
    Active,
    AccessTokenCiphertext,
    RefreshTokenCiphertext,
    ApiKeyCiphertext,
    ExpiresAt,
    Scopes,
    Metadata,
    LastSyncedAt,
    CreatedAt,
    UpdatedAt,
}
