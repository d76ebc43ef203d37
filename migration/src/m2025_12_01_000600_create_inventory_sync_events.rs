//! Migration to create the inventory_sync_events table (append-only).

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(InventorySyncEvents::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(InventorySyncEvents::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(InventorySyncEvents::SellerId).uuid().not_null())
                    .col(
                        ColumnDef::new(InventorySyncEvents::ConnectionId)
                            .uuid()
                            .not_null(),
                    )
                    .col(ColumnDef::new(InventorySyncEvents::MappingId).uuid().null())
                    .col(
                        ColumnDef::new(InventorySyncEvents::Direction)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(InventorySyncEvents::QuantityBefore)
                            .integer()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(InventorySyncEvents::QuantityAfter)
                            .integer()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(InventorySyncEvents::Status)
                            .text()
                            .not_null()
                            .default("ok"),
                    )
                    .col(ColumnDef::new(InventorySyncEvents::ErrorMessage).text().null())
                    .col(
                        ColumnDef::new(InventorySyncEvents::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_inventory_sync_events_connection_id")
                            .from(
                                InventorySyncEvents::Table,
                                InventorySyncEvents::ConnectionId,
                            )
                            .to(ChannelConnections::Table, ChannelConnections::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_inventory_sync_events_connection_created")
                    .table(InventorySyncEvents::Table)
                    .col(InventorySyncEvents::ConnectionId)
                    .col(InventorySyncEvents::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_inventory_sync_events_connection_created")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(InventorySyncEvents::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum InventorySyncEvents {
    Table,
    Id,
    SellerId,
    ConnectionId,
    MappingId,
    Direction,
    QuantityBefore,
    QuantityAfter,
    Status,
    ErrorMessage,
    CreatedAt,
}

#[derive(DeriveIden)]
enum ChannelConnections {
    Table,
    Id,
}
