//! Default builders, one per component kind

use std::sync::Arc;

use tracing::{debug, info_span};

use crate::command::Command;
use crate::error::Result;
use crate::mapper::Mapper;
use crate::relation::{Association, Relation};
use crate::runtime::Element;
use crate::schema::Schema;

use super::{BuildContext, Class};

/// Build the element for a prepared class.
///
/// Dependencies are resolved through `cx`, building them first when the
/// build order has not reached them yet.
pub fn build_default(class: &mut Class, cx: &mut BuildContext<'_>) -> Result<Element> {
    match class {
        Class::Gateway(gateway) => {
            let adapter = cx.adapters().get(&gateway.adapter)?;
            let mut instance = adapter.setup(&gateway.id, &gateway.args, &gateway.options)?;
            instance.configure(gateway.options.clone());
            if gateway.logger {
                instance.use_logger(info_span!("gateway", id = %gateway.id, adapter = %gateway.adapter));
            }
            debug!(gateway = %gateway.id, adapter = %gateway.adapter, "gateway ready");
            Ok(Element::Gateway(Arc::from(instance)))
        }
        Class::Dataset(dataset) => {
            let gateway = cx.gateway(&dataset.gateway)?;
            Ok(Element::Dataset(gateway.dataset(&dataset.id)?))
        }
        Class::Schema(schema) => {
            schema.finalize();
            Ok(Element::Schema(Arc::new(schema.clone())))
        }
        Class::Association(association) => Ok(Element::Association(Arc::new(association.clone()))),
        Class::Relation(relation) => {
            let dataset = cx.dataset(&relation.dataset_key())?;
            let schema = match relation.schema.clone() {
                Some(schema) => schema,
                None => {
                    let mut schema = Schema::new(relation.id.clone());
                    schema.finalize();
                    schema
                }
            };
            let associations = cx
                .elements()
                .associations
                .iter()
                .filter(|(_, a)| a.source == relation.id)
                .map(|(_, a)| Association::clone(a))
                .collect();
            Ok(Element::Relation(Arc::new(Relation::new(
                relation.clone(),
                dataset,
                schema,
                associations,
            ))))
        }
        Class::Command(command) => {
            let relation = cx.relation(&command.relation)?;
            Ok(Element::Command(Arc::new(Command::new(
                command.clone(),
                Relation::clone(&relation),
            ))))
        }
        Class::Mapper(mapper) => Ok(Element::Mapper(Arc::new(Mapper::new(mapper.clone())))),
    }
}
