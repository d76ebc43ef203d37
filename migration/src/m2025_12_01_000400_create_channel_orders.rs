//! Migration to create the channel_orders table.
//!
//! Normalized order ledger. The (connection_id, channel_order_id) unique
//! index is the natural key the idempotent upsert path relies on.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ChannelOrders::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ChannelOrders::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ChannelOrders::SellerId).uuid().not_null())
                    .col(ColumnDef::new(ChannelOrders::ConnectionId).uuid().not_null())
                    .col(
                        ColumnDef::new(ChannelOrders::ChannelOrderId)
                            .text()
                            .not_null(),
                    )
                    .col(ColumnDef::new(ChannelOrders::ChannelOrderNumber).text().null())
                    .col(ColumnDef::new(ChannelOrders::Status).text().not_null())
                    .col(ColumnDef::new(ChannelOrders::TotalAmount).text().not_null())
                    .col(ColumnDef::new(ChannelOrders::Currency).text().not_null())
                    .col(ColumnDef::new(ChannelOrders::CustomerEmail).text().null())
                    .col(
                        ColumnDef::new(ChannelOrders::RawPayload)
                            .json_binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ChannelOrders::ChannelUpdatedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ChannelOrders::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(ChannelOrders::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_channel_orders_connection_id")
                            .from(ChannelOrders::Table, ChannelOrders::ConnectionId)
                            .to(ChannelConnections::Table, ChannelConnections::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_channel_orders_connection_channel_order")
                    .table(ChannelOrders::Table)
                    .col(ChannelOrders::ConnectionId)
                    .col(ChannelOrders::ChannelOrderId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_channel_orders_seller_id")
                    .table(ChannelOrders::Table)
                    .col(ChannelOrders::SellerId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_channel_orders_connection_channel_order")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(Index::drop().name("idx_channel_orders_seller_id").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(ChannelOrders::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ChannelOrders {
    Table,
    Id,
    SellerId,
    ConnectionId,
    ChannelOrderId,
    ChannelOrderNumber,
    Status,
    TotalAmount,
    Currency,
    CustomerEmail,
    RawPayload,
    ChannelUpdatedAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum ChannelConnections {
    Table,
    Id,
}
